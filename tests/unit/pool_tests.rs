//! Object pool tests

use rstest::rstest;

use crate::common::FailingAlloc;
use rtcore::alloc::SystemAlloc;
use rtcore::pool::ObjectPool;

#[derive(Debug, Default, PartialEq)]
struct Payload {
    value: i32,
}

#[rstest]
fn smoke_get_auto_and_drain() {
    let alloc = SystemAlloc;
    let mut pool: ObjectPool<'_, Payload, _> = ObjectPool::new(&alloc, 0);
    assert_eq!(pool.len(), 0);

    assert_eq!(pool.add_to_pool(5), 5);
    assert_eq!(pool.len(), 5);

    // Scoped handles return their slot immediately.
    for i in 0..10 {
        let mut obj = pool.get_scoped(Payload { value: i }).unwrap();
        obj.value += 1;
        assert_eq!(obj.value, i + 1);
    }
    assert_eq!(pool.len(), 5);

    // Drain every slot, then force an elastic refill.
    let mut held = Vec::new();
    for i in 0..5 {
        held.push(pool.get(Payload { value: i }).unwrap());
    }
    assert!(pool.is_empty());
    let extra = pool.get(Payload { value: 99 }).unwrap();

    unsafe {
        pool.put(extra);
        for p in held {
            pool.put(p);
        }
    }
    assert_eq!(pool.len(), 6);
}

#[rstest]
fn add_to_pool_reports_partial_allocation() {
    // Three successful allocations: one for the slot stack's buffer, two
    // for slots; the third slot request fails.
    let alloc = FailingAlloc::new(3);
    let mut pool: ObjectPool<'_, Payload, _> = ObjectPool::new(&alloc, 0);
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.add_to_pool(3), 2);
    assert_eq!(pool.len(), 2);
}

#[rstest]
fn exhausted_allocator_fails_get() {
    let alloc = FailingAlloc::new(0);
    let mut pool: ObjectPool<'_, Payload, _> = ObjectPool::new(&alloc, 0);
    assert!(pool.get(Payload { value: 1 }).is_none());
    assert!(pool.is_empty());
}

#[rstest]
fn destructors_run_on_put_not_on_pool_drop() {
    use std::cell::Cell;
    struct Guarded<'f> {
        flag: &'f Cell<u32>,
    }
    impl Drop for Guarded<'_> {
        fn drop(&mut self) {
            self.flag.set(self.flag.get() + 1);
        }
    }

    let alloc = SystemAlloc;
    let drops = Cell::new(0);
    {
        let mut pool: ObjectPool<'_, Guarded<'_>, _> = ObjectPool::new(&alloc, 1);
        {
            let obj = pool.get_scoped(Guarded { flag: &drops }).unwrap();
            assert_eq!(obj.flag.get(), 0);
        }
        // Dropped exactly once, by the guard.
        assert_eq!(drops.get(), 1);

        let raw = pool.get(Guarded { flag: &drops }).unwrap();
        unsafe { pool.put(raw) };
        assert_eq!(drops.get(), 2);
    }
    // Pool drop releases raw slots without running value destructors again.
    assert_eq!(drops.get(), 2);
}

#[rstest]
fn elasticity_refills_in_batches() {
    let alloc = SystemAlloc;
    let mut pool: ObjectPool<'_, u64, _> = ObjectPool::with_elasticity(&alloc, 0, 4);
    assert_eq!(pool.elasticity(), 4);

    // Empty pool: the get triggers one batch refill of four slots.
    let p = pool.get(7).unwrap();
    assert_eq!(pool.len(), 3);
    unsafe { pool.put(p) };
    assert_eq!(pool.len(), 4);
}
