//! Reference-counted handles over a [`RawAlloc`]
//!
//! [`RtRc`]/[`RtWeak`] mirror the `Arc`/`Weak` split but allocate the
//! control block and the pointee from a caller-chosen allocator, in two
//! separate allocations so the control block can outlive the pointee.
//! [`RtBox`] is the single-owner counterpart.
//!
//! Counting rules: the weak count carries one "life token" on behalf of all
//! strong handles, added when the strong count leaves zero. The pointee dies
//! when the strong count returns to zero; the control block is released when
//! the weak count does. Cycles of strong handles leak by design; break them
//! with weak handles.

use std::cell::UnsafeCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::alloc::RawAlloc;

/// Shared count record paired with every jointly owned object.
///
/// Exposed so the counting algebra can be driven (and tested) directly; the
/// handles below are the everyday interface.
pub struct ControlBlock<T> {
    strong: AtomicU32,
    weak: AtomicU32,
    data: UnsafeCell<Option<NonNull<T>>>,
}

impl<T> ControlBlock<T> {
    /// Creates a block owning `data` with both counts at zero.
    pub fn new(data: Option<NonNull<T>>) -> ControlBlock<T> {
        ControlBlock {
            strong: AtomicU32::new(0),
            weak: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Current strong count.
    pub fn strong_count(&self) -> u32 {
        self.strong.load(Ordering::Acquire)
    }

    /// Current weak count (life token included while strong > 0).
    pub fn weak_count(&self) -> u32 {
        self.weak.load(Ordering::Acquire)
    }

    /// Raw pointee pointer; `None` once the pointee is destroyed.
    pub fn get(&self) -> Option<NonNull<T>> {
        unsafe { *self.data.get() }
    }

    /// Increments the strong count; the transition from zero also takes the
    /// weak-side life token.
    pub fn inc_strong(&self) {
        if self.strong.fetch_add(1, Ordering::Relaxed) == 0 {
            self.weak.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Increments the weak count.
    pub fn inc_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the strong count. Dropping the last strong reference
    /// destroys and releases the pointee, then gives back the life token.
    ///
    /// Returns true when the control block itself must now be released.
    ///
    /// # Safety
    ///
    /// `alloc` must be the allocator the pointee came from, and the caller
    /// must hold a strong reference to give up.
    pub unsafe fn dec_strong<A: RawAlloc>(&self, alloc: &A) -> bool {
        let prev = self.strong.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0, "strong underflow");
        if prev == 1 {
            fence(Ordering::Acquire);
            self.destroy_pointee(alloc);
            return self.dec_weak();
        }
        false
    }

    /// Decrements the weak count; true when the control block must now be
    /// released.
    pub fn dec_weak(&self) -> bool {
        let prev = self.weak.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0, "weak underflow");
        if prev == 1 {
            fence(Ordering::Acquire);
            return true;
        }
        false
    }

    /// Attempts to take a new strong reference for a weak handle: bumps the
    /// strong count from any nonzero value, failing once it has hit zero.
    pub fn try_lock_strong(&self) -> Option<NonNull<T>> {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return None;
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return self.get(),
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops the pointee in place and releases its allocation.
    ///
    /// # Safety
    ///
    /// Must run at most once, after the strong count reached zero.
    unsafe fn destroy_pointee<A: RawAlloc>(&self, alloc: &A) {
        if let Some(p) = (*self.data.get()).take() {
            ptr::drop_in_place(p.as_ptr());
            alloc.dealloc(p.cast());
        }
    }
}

// Counts are atomic and the pointee slot is only mutated by the single
// thread that wins the final strong decrement.
unsafe impl<T: Send + Sync> Send for ControlBlock<T> {}
unsafe impl<T: Send + Sync> Sync for ControlBlock<T> {}

/// Control block for slices: destruction walks `len` elements in order.
struct ArrayControlBlock<T> {
    strong: AtomicU32,
    weak: AtomicU32,
    len: usize,
    data: UnsafeCell<Option<NonNull<T>>>,
}

impl<T> ArrayControlBlock<T> {
    unsafe fn destroy_pointee<A: RawAlloc>(&self, alloc: &A) {
        if let Some(p) = (*self.data.get()).take() {
            for i in 0..self.len {
                ptr::drop_in_place(p.as_ptr().add(i));
            }
            alloc.dealloc(p.cast());
        }
    }

    unsafe fn dec_strong<A: RawAlloc>(&self, alloc: &A) -> bool {
        let prev = self.strong.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0, "strong underflow");
        if prev == 1 {
            fence(Ordering::Acquire);
            self.destroy_pointee(alloc);
            let prev_weak = self.weak.fetch_sub(1, Ordering::Release);
            debug_assert!(prev_weak != 0, "weak underflow");
            if prev_weak == 1 {
                fence(Ordering::Acquire);
                return true;
            }
        }
        false
    }

    fn inc_strong(&self) {
        if self.strong.fetch_add(1, Ordering::Relaxed) == 0 {
            self.weak.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Strong handle to a jointly owned value.
pub struct RtRc<'a, T, A: RawAlloc> {
    alloc: &'a A,
    cb: NonNull<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Send for RtRc<'_, T, A> {}
unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Sync for RtRc<'_, T, A> {}

impl<'a, T, A: RawAlloc> RtRc<'a, T, A> {
    /// Allocates a control block and a pointee holding `value`.
    ///
    /// `None` when either allocation fails; a partial allocation is rolled
    /// back.
    pub fn new(alloc: &'a A, value: T) -> Option<RtRc<'a, T, A>> {
        debug_assert!(mem::align_of::<T>() <= crate::tlsf::ALIGN);
        let cb = alloc.alloc(mem::size_of::<ControlBlock<T>>())?.cast::<ControlBlock<T>>();
        let Some(data) = alloc.alloc(mem::size_of::<T>()) else {
            unsafe { alloc.dealloc(cb.cast()) };
            return None;
        };
        let data = data.cast::<T>();
        unsafe {
            ptr::write(data.as_ptr(), value);
            ptr::write(cb.as_ptr(), ControlBlock::new(Some(data)));
            cb.as_ref().inc_strong();
        }
        Some(RtRc { alloc, cb })
    }

    fn cb(&self) -> &ControlBlock<T> {
        unsafe { self.cb.as_ref() }
    }

    /// Number of strong handles alive.
    pub fn strong_count(&self) -> u32 {
        self.cb().strong_count()
    }

    /// Raw pointer to the value.
    pub fn as_ptr(&self) -> *const T {
        self.cb().get().map_or(ptr::null(), |p| p.as_ptr())
    }

    /// True when both handles share one control block.
    pub fn ptr_eq(&self, other: &RtRc<'a, T, A>) -> bool {
        self.cb == other.cb
    }

    /// Creates a weak handle to the same value.
    pub fn downgrade(&self) -> RtWeak<'a, T, A> {
        self.cb().inc_weak();
        RtWeak {
            alloc: self.alloc,
            cb: self.cb,
        }
    }
}

impl<'a, T, A: RawAlloc> Clone for RtRc<'a, T, A> {
    fn clone(&self) -> RtRc<'a, T, A> {
        self.cb().inc_strong();
        RtRc {
            alloc: self.alloc,
            cb: self.cb,
        }
    }
}

impl<'a, T, A: RawAlloc> Deref for RtRc<'a, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        // A live strong handle keeps the pointee alive.
        unsafe { self.cb().get().expect("pointee gone under a strong handle").as_ref() }
    }
}

impl<'a, T, A: RawAlloc> Drop for RtRc<'a, T, A> {
    fn drop(&mut self) {
        unsafe {
            if self.cb().dec_strong(self.alloc) {
                self.alloc.dealloc(self.cb.cast());
            }
        }
    }
}

/// Weak handle: observes the value without keeping it alive.
pub struct RtWeak<'a, T, A: RawAlloc> {
    alloc: &'a A,
    cb: NonNull<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Send for RtWeak<'_, T, A> {}
unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Sync for RtWeak<'_, T, A> {}

impl<'a, T, A: RawAlloc> RtWeak<'a, T, A> {
    fn cb(&self) -> &ControlBlock<T> {
        unsafe { self.cb.as_ref() }
    }

    /// Number of strong handles alive.
    pub fn strong_count(&self) -> u32 {
        self.cb().strong_count()
    }

    /// True once the pointee has been destroyed.
    pub fn is_expired(&self) -> bool {
        self.strong_count() == 0
    }

    /// Attempts to produce a strong handle; fails once the strong count has
    /// reached zero.
    pub fn upgrade(&self) -> Option<RtRc<'a, T, A>> {
        self.cb().try_lock_strong()?;
        Some(RtRc {
            alloc: self.alloc,
            cb: self.cb,
        })
    }
}

impl<'a, T, A: RawAlloc> Clone for RtWeak<'a, T, A> {
    fn clone(&self) -> RtWeak<'a, T, A> {
        self.cb().inc_weak();
        RtWeak {
            alloc: self.alloc,
            cb: self.cb,
        }
    }
}

impl<'a, T, A: RawAlloc> Drop for RtWeak<'a, T, A> {
    fn drop(&mut self) {
        if self.cb().dec_weak() {
            unsafe { self.alloc.dealloc(self.cb.cast()) };
        }
    }
}

/// Strong handle to a jointly owned slice.
pub struct RtRcArray<'a, T, A: RawAlloc> {
    alloc: &'a A,
    cb: NonNull<ArrayControlBlock<T>>,
}

unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Send for RtRcArray<'_, T, A> {}
unsafe impl<T: Send + Sync, A: RawAlloc + Sync> Sync for RtRcArray<'_, T, A> {}

impl<'a, T, A: RawAlloc> RtRcArray<'a, T, A> {
    /// Allocates a shared slice of `len` clones of `value`.
    pub fn new(alloc: &'a A, len: usize, value: T) -> Option<RtRcArray<'a, T, A>>
    where
        T: Clone,
    {
        Self::new_with(alloc, len, |_| value.clone())
    }

    /// Allocates a shared slice filled by `fill(index)`.
    pub fn new_with(
        alloc: &'a A,
        len: usize,
        mut fill: impl FnMut(usize) -> T,
    ) -> Option<RtRcArray<'a, T, A>> {
        debug_assert!(mem::align_of::<T>() <= crate::tlsf::ALIGN);
        let cb = alloc
            .alloc(mem::size_of::<ArrayControlBlock<T>>())?
            .cast::<ArrayControlBlock<T>>();
        let bytes = mem::size_of::<T>().checked_mul(len)?;
        let Some(data) = alloc.alloc(bytes) else {
            unsafe { alloc.dealloc(cb.cast()) };
            return None;
        };
        let data = data.cast::<T>();
        unsafe {
            for i in 0..len {
                ptr::write(data.as_ptr().add(i), fill(i));
            }
            ptr::write(
                cb.as_ptr(),
                ArrayControlBlock {
                    strong: AtomicU32::new(0),
                    weak: AtomicU32::new(0),
                    len,
                    data: UnsafeCell::new(Some(data)),
                },
            );
            cb.as_ref().inc_strong();
        }
        Some(RtRcArray { alloc, cb })
    }

    fn cb(&self) -> &ArrayControlBlock<T> {
        unsafe { self.cb.as_ref() }
    }

    /// Number of elements in the slice.
    pub fn len(&self) -> usize {
        self.cb().len
    }

    /// True for a zero-length slice.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of strong handles alive.
    pub fn strong_count(&self) -> u32 {
        self.cb().strong.load(Ordering::Acquire)
    }
}

impl<'a, T, A: RawAlloc> Clone for RtRcArray<'a, T, A> {
    fn clone(&self) -> RtRcArray<'a, T, A> {
        self.cb().inc_strong();
        RtRcArray {
            alloc: self.alloc,
            cb: self.cb,
        }
    }
}

impl<'a, T, A: RawAlloc> Deref for RtRcArray<'a, T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        let cb = self.cb();
        let data = unsafe { *cb.data.get() }.expect("pointee gone under a strong handle");
        unsafe { std::slice::from_raw_parts(data.as_ptr(), cb.len) }
    }
}

impl<'a, T, A: RawAlloc> Drop for RtRcArray<'a, T, A> {
    fn drop(&mut self) {
        unsafe {
            if self.cb().dec_strong(self.alloc) {
                self.alloc.dealloc(self.cb.cast());
            }
        }
    }
}

/// Single-owner handle to an allocator-backed value.
pub struct RtBox<'a, T, A: RawAlloc> {
    alloc: &'a A,
    data: NonNull<T>,
}

unsafe impl<T: Send, A: RawAlloc + Sync> Send for RtBox<'_, T, A> {}
unsafe impl<T: Sync, A: RawAlloc + Sync> Sync for RtBox<'_, T, A> {}

impl<'a, T, A: RawAlloc> RtBox<'a, T, A> {
    /// Allocates and takes sole ownership of `value`.
    pub fn new(alloc: &'a A, value: T) -> Option<RtBox<'a, T, A>> {
        debug_assert!(mem::align_of::<T>() <= crate::tlsf::ALIGN);
        let data = alloc.alloc(mem::size_of::<T>())?.cast::<T>();
        unsafe { ptr::write(data.as_ptr(), value) };
        Some(RtBox { alloc, data })
    }

    /// Releases ownership without destroying the value; pair with
    /// [`RtBox::from_raw`].
    pub fn into_raw(this: RtBox<'a, T, A>) -> NonNull<T> {
        let data = this.data;
        mem::forget(this);
        data
    }

    /// Reclaims ownership of a pointer from [`RtBox::into_raw`].
    ///
    /// # Safety
    ///
    /// `data` must come from `into_raw` on a box backed by `alloc`, and
    /// ownership must not be reclaimed twice.
    pub unsafe fn from_raw(alloc: &'a A, data: NonNull<T>) -> RtBox<'a, T, A> {
        RtBox { alloc, data }
    }
}

impl<'a, T, A: RawAlloc> Deref for RtBox<'a, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.data.as_ref() }
    }
}

impl<'a, T, A: RawAlloc> DerefMut for RtBox<'a, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.data.as_mut() }
    }
}

impl<'a, T, A: RawAlloc> Drop for RtBox<'a, T, A> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.data.as_ptr());
            self.alloc.dealloc(self.data.cast());
        }
    }
}

/// Single-owner handle to an allocator-backed slice.
pub struct RtBoxArray<'a, T, A: RawAlloc> {
    alloc: &'a A,
    data: NonNull<T>,
    len: usize,
}

unsafe impl<T: Send, A: RawAlloc + Sync> Send for RtBoxArray<'_, T, A> {}
unsafe impl<T: Sync, A: RawAlloc + Sync> Sync for RtBoxArray<'_, T, A> {}

impl<'a, T, A: RawAlloc> RtBoxArray<'a, T, A> {
    /// Allocates a slice of `len` clones of `value`.
    pub fn new(alloc: &'a A, len: usize, value: T) -> Option<RtBoxArray<'a, T, A>>
    where
        T: Clone,
    {
        let bytes = mem::size_of::<T>().checked_mul(len)?;
        let data = alloc.alloc(bytes)?.cast::<T>();
        unsafe {
            for i in 0..len {
                ptr::write(data.as_ptr().add(i), value.clone());
            }
        }
        Some(RtBoxArray { alloc, data, len })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length slice.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a, T, A: RawAlloc> Deref for RtBoxArray<'a, T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl<'a, T, A: RawAlloc> DerefMut for RtBoxArray<'a, T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl<'a, T, A: RawAlloc> Drop for RtBoxArray<'a, T, A> {
    fn drop(&mut self) {
        unsafe {
            for i in 0..self.len {
                ptr::drop_in_place(self.data.as_ptr().add(i));
            }
            self.alloc.dealloc(self.data.cast());
        }
    }
}
