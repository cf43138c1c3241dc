//! Control-block algebra and handle behavior tests

use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;

use rstest::rstest;

use rtcore::alloc::{RawAlloc, SystemAlloc};
use rtcore::rc::{ControlBlock, RtRc, RtRcArray};

fn make_pointee<T>(alloc: &SystemAlloc, value: T) -> NonNull<T> {
    let p = alloc.alloc(mem::size_of::<T>()).unwrap().cast::<T>();
    unsafe { ptr::write(p.as_ptr(), value) };
    p
}

struct FlagOnDrop<'f>(&'f AtomicBool);

impl Drop for FlagOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[rstest]
fn control_block_count_walkthrough() {
    // inc_strong; inc_weak; dec_strong destroys the pointee and leaves
    // (0, 1); the following dec_weak reports control-block release.
    let alloc = SystemAlloc;
    let destroyed = AtomicBool::new(false);
    let pointee = make_pointee(&alloc, FlagOnDrop(&destroyed));
    let ctrl = ControlBlock::new(Some(pointee));

    assert_eq!(ctrl.strong_count(), 0);
    assert_eq!(ctrl.weak_count(), 0);

    ctrl.inc_strong();
    assert_eq!(ctrl.strong_count(), 1);
    assert_eq!(ctrl.weak_count(), 1);

    ctrl.inc_weak();
    assert_eq!(ctrl.strong_count(), 1);
    assert_eq!(ctrl.weak_count(), 2);

    assert!(!destroyed.load(Ordering::Acquire));
    assert!(!unsafe { ctrl.dec_strong(&alloc) });
    assert!(destroyed.load(Ordering::Acquire));
    assert_eq!(ctrl.strong_count(), 0);
    assert_eq!(ctrl.weak_count(), 1);

    assert!(ctrl.dec_weak());
    assert!(ctrl.try_lock_strong().is_none());
}

#[rstest]
fn control_block_weak_first_release() {
    let alloc = SystemAlloc;
    let destroyed = AtomicBool::new(false);
    let pointee = make_pointee(&alloc, FlagOnDrop(&destroyed));
    let ctrl = ControlBlock::new(Some(pointee));

    ctrl.inc_strong();
    ctrl.inc_weak();

    // Dropping the weak side first must not touch the pointee.
    assert!(!ctrl.dec_weak());
    assert_eq!(ctrl.strong_count(), 1);
    assert_eq!(ctrl.weak_count(), 1);
    assert!(!destroyed.load(Ordering::Acquire));

    // The last strong drop destroys the pointee and releases the block.
    assert!(unsafe { ctrl.dec_strong(&alloc) });
    assert!(destroyed.load(Ordering::Acquire));
    assert_eq!(ctrl.strong_count(), 0);
    assert_eq!(ctrl.weak_count(), 0);
}

#[rstest]
fn contended_strong_cycling_with_an_outer_weak() {
    // Ten threads repeatedly take and drop strong references while an outer
    // weak reference pins the control block; no cycle may ever report
    // control-block release.
    let alloc = SystemAlloc;
    let destroyed = AtomicBool::new(false);
    let pointee = make_pointee(&alloc, FlagOnDrop(&destroyed));
    let ctrl = ControlBlock::new(Some(pointee));

    ctrl.inc_weak();

    let threads = 10;
    let barrier = Barrier::new(threads);
    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..200 {
                    ctrl.inc_strong();
                    std::thread::yield_now();
                    assert!(!unsafe { ctrl.dec_strong(&alloc) });
                }
            });
        }
    });

    // The pointee died on the first time the strong count returned to zero.
    assert!(destroyed.load(Ordering::Acquire));
    assert!(ctrl.dec_weak());
}

#[rstest]
fn weak_lock_tracks_strong_liveness() {
    let alloc = SystemAlloc;
    let first = RtRc::new(&alloc, 7u64).unwrap();
    let weak = first.downgrade();

    // Any mix of clones and drops: upgrade succeeds while >= 1 strong lives.
    let second = first.clone();
    drop(first);
    assert_eq!(weak.strong_count(), 1);
    assert!(weak.upgrade().is_some());

    let third = weak.upgrade().unwrap();
    drop(second);
    assert!(!weak.is_expired());
    drop(third);

    assert!(weak.is_expired());
    assert!(weak.upgrade().is_none());

    // A second weak handle observes the same expiry.
    let other = weak.clone();
    assert!(other.upgrade().is_none());
}

#[rstest]
fn object_destructor_runs_on_last_strong_drop() {
    let alloc = SystemAlloc;
    let destroyed = AtomicBool::new(false);

    let strong = RtRc::new(&alloc, FlagOnDrop(&destroyed)).unwrap();
    let weak = strong.downgrade();
    let clone = strong.clone();

    drop(strong);
    assert!(!destroyed.load(Ordering::Acquire));
    drop(clone);
    assert!(destroyed.load(Ordering::Acquire));
    assert!(weak.upgrade().is_none());
}

#[rstest]
fn shared_slices_destroy_every_element() {
    use std::sync::atomic::AtomicUsize;
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone)]
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    let alloc = SystemAlloc;
    {
        let arr = RtRcArray::new(&alloc, 8, Counted).unwrap();
        assert_eq!(arr.len(), 8);
        let clone = arr.clone();
        assert_eq!(clone.strong_count(), 2);
        drop(arr);
        assert_eq!(DROPS.load(Ordering::Relaxed), 1); // the fill template
    }
    assert_eq!(DROPS.load(Ordering::Relaxed), 9);
}

#[rstest]
fn handles_move_across_threads() {
    let alloc = SystemAlloc;
    let shared = RtRc::new(&alloc, 123u64).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let local = shared.clone();
            scope.spawn(move || {
                assert_eq!(*local, 123);
                let weak = local.downgrade();
                assert!(weak.upgrade().is_some());
            });
        }
    });
    assert_eq!(shared.strong_count(), 1);
}
