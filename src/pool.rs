//! Typed object pool with elastic refill
//!
//! Keeps a stack of raw slots for `T` so construction never pays the
//! allocator on the hot path. When the pool runs empty, `get` refills it by
//! the configured elasticity in one batch.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::alloc::RawAlloc;
use crate::constants::DEFAULT_POOL_ELASTICITY;
use crate::vec::RtVec;

/// Pool of pre-allocated slots for values of type `T`.
///
/// Slots handed out through [`ObjectPool::get`] must come back through
/// [`ObjectPool::put`] (or ride a [`PoolGuard`]), otherwise the slot leaks
/// until the pool is dropped. Not thread-safe.
pub struct ObjectPool<'a, T, A: RawAlloc> {
    slots: RtVec<'a, NonNull<T>, A>,
    alloc: &'a A,
    elasticity: usize,
}

impl<'a, T, A: RawAlloc> ObjectPool<'a, T, A> {
    /// Creates a pool and pre-allocates `num_objects` raw slots. The pool
    /// may hold fewer when the allocator runs out partway.
    pub fn new(alloc: &'a A, num_objects: usize) -> ObjectPool<'a, T, A> {
        Self::with_elasticity(alloc, num_objects, DEFAULT_POOL_ELASTICITY)
    }

    /// Creates a pool with a custom refill batch size (clamped to at least 1).
    pub fn with_elasticity(
        alloc: &'a A,
        num_objects: usize,
        elasticity: usize,
    ) -> ObjectPool<'a, T, A> {
        debug_assert!(mem::align_of::<T>() <= crate::tlsf::ALIGN);
        let mut pool = ObjectPool {
            slots: RtVec::new(alloc),
            alloc,
            elasticity: elasticity.max(1),
        };
        let _ = pool.add_to_pool(num_objects);
        pool
    }

    /// Pre-allocates `num_objects` more raw slots (no construction) and
    /// returns how many were actually added.
    pub fn add_to_pool(&mut self, num_objects: usize) -> usize {
        self.slots.reserve(self.slots.len() + num_objects);
        for i in 0..num_objects {
            let Some(raw) = self.alloc.alloc(mem::size_of::<T>()) else {
                return i;
            };
            let slot = raw.cast::<T>();
            if self.slots.push(slot).is_err() {
                unsafe { self.alloc.dealloc(raw) };
                return i;
            }
        }
        num_objects
    }

    /// Pops a slot and constructs `value` in it. Refills the pool by the
    /// elasticity first when it is empty; `None` means the refill failed.
    ///
    /// The result must eventually go back through [`ObjectPool::put`].
    pub fn get(&mut self, value: T) -> Option<NonNull<T>> {
        if self.slots.is_empty() && self.add_to_pool(self.elasticity) < 1 {
            return None;
        }
        let slot = self.slots.pop().expect("pool refill left no slot");
        unsafe { ptr::write(slot.as_ptr(), value) };
        Some(slot)
    }

    /// Like [`ObjectPool::get`], but wrapped in a guard that destructs the
    /// value and recycles the slot when it leaves scope.
    pub fn get_scoped(&mut self, value: T) -> Option<PoolGuard<'_, 'a, T, A>> {
        let ptr = self.get(value)?;
        Some(PoolGuard { pool: self, ptr })
    }

    /// Destructs the value and returns its slot to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`ObjectPool::get`] on this pool, hold a live
    /// value, and must not be used afterwards.
    pub unsafe fn put(&mut self, ptr: NonNull<T>) {
        ptr::drop_in_place(ptr.as_ptr());
        if self.slots.push(ptr).is_err() {
            // No room to keep the slot; hand it back to the allocator.
            self.alloc.dealloc(ptr.cast());
        }
    }

    /// Number of free slots currently pooled.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no free slots are pooled.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The refill batch size.
    pub fn elasticity(&self) -> usize {
        self.elasticity
    }

    /// Changes the refill batch size (clamped to at least 1).
    pub fn set_elasticity(&mut self, elasticity: usize) {
        self.elasticity = elasticity.max(1);
    }
}

impl<'a, T, A: RawAlloc> Drop for ObjectPool<'a, T, A> {
    fn drop(&mut self) {
        // Slots hold raw storage only: values were dropped on `put`.
        while let Some(slot) = self.slots.pop() {
            unsafe { self.alloc.dealloc(slot.cast()) };
        }
    }
}

/// Scoped handle to a pooled value; destructs the value and recycles the
/// slot on drop.
pub struct PoolGuard<'p, 'a, T, A: RawAlloc> {
    pool: &'p mut ObjectPool<'a, T, A>,
    ptr: NonNull<T>,
}

impl<'p, 'a, T, A: RawAlloc> Deref for PoolGuard<'p, 'a, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<'p, 'a, T, A: RawAlloc> DerefMut for PoolGuard<'p, 'a, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<'p, 'a, T, A: RawAlloc> Drop for PoolGuard<'p, 'a, T, A> {
    fn drop(&mut self) {
        unsafe { self.pool.put(self.ptr) };
    }
}
