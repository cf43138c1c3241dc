//! Allocator capability and the shareable arena handles
//!
//! Containers never talk to the arena directly; they allocate through the
//! [`RawAlloc`] capability. [`RtAlloc`] puts the TLSF arena behind a lock
//! chosen at type level — a real mutex for shared use, the no-op lock for
//! single-threaded clients at zero overhead.

use std::alloc::Layout;
use std::ptr::NonNull;

use lock_api::{Mutex, RawMutex};

use crate::error::ArenaResult;
use crate::sync::{NoopLock, SystemLock};
use crate::tlsf::{TlsfArena, ALIGN};

/// Allocation capability every container is generic over.
///
/// `alloc` hands out at least `size` bytes aligned to [`ALIGN`], or `None`
/// when the backing store is exhausted. Implementations take `&self`: a
/// single allocator instance is shared by reference between many containers.
pub trait RawAlloc {
    /// Allocates at least `size` bytes, aligned to [`ALIGN`].
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns memory obtained from [`RawAlloc::alloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc` on this same allocator and must not be
    /// used after this call.
    unsafe fn dealloc(&self, ptr: NonNull<u8>);
}

/// The TLSF arena behind a lock, satisfying [`RawAlloc`].
///
/// Construct empty, then point it at a region with [`RtAlloc::init`];
/// allocation on an uninitialized handle reports exhaustion rather than
/// panicking. The region itself stays owned by the caller (see
/// [`crate::region::MmapRegion`] for the usual source).
pub struct RtAlloc<R: RawMutex> {
    inner: Mutex<R, Option<TlsfArena>>,
}

/// Single-threaded arena handle; the lock compiles away.
pub type RtAllocSt = RtAlloc<NoopLock>;

/// Thread-safe arena handle over the system lock.
pub type RtAllocMt = RtAlloc<SystemLock>;

impl<R: RawMutex> RtAlloc<R> {
    /// Creates an empty handle; [`RtAlloc::init`] must be called before use.
    pub fn new() -> RtAlloc<R> {
        RtAlloc {
            inner: Mutex::new(None),
        }
    }

    /// Builds the arena over `capacity` bytes of `buf`.
    ///
    /// Idempotent: an already initialized handle reports success without
    /// touching the existing arena.
    ///
    /// # Safety
    ///
    /// Same contract as [`TlsfArena::new`]: the region must stay valid and
    /// unaliased for the lifetime of the handle.
    pub unsafe fn init(&self, buf: NonNull<u8>, capacity: usize) -> ArenaResult<()> {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(TlsfArena::new(buf, capacity)?);
        tracing::debug!(capacity, "allocator initialized");
        Ok(())
    }

    /// Drops the arena; the handle can be re-initialized afterwards.
    pub fn uninit(&self) {
        *self.inner.lock() = None;
    }

    /// True once [`RtAlloc::init`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<R: RawMutex> Default for RtAlloc<R> {
    fn default() -> RtAlloc<R> {
        RtAlloc::new()
    }
}

impl<R: RawMutex> RawAlloc for RtAlloc<R> {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().as_mut()?.alloc(size)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>) {
        let mut guard = self.inner.lock();
        debug_assert!(guard.is_some(), "dealloc on an uninitialized allocator");
        if let Some(arena) = guard.as_mut() {
            arena.free(ptr);
        }
    }
}

/// [`RawAlloc`] over the process global allocator.
///
/// A size prefix is stored in front of every allocation so the layout can be
/// reconstructed on release. Mostly useful for exercising the containers
/// without standing up an arena.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

const PREFIX: usize = ALIGN;

impl RawAlloc for SystemAlloc {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let total = size.checked_add(PREFIX)?;
        let layout = Layout::from_size_align(total, ALIGN).ok()?;
        unsafe {
            let base = std::alloc::alloc(layout);
            if base.is_null() {
                return None;
            }
            base.cast::<usize>().write(total);
            Some(NonNull::new_unchecked(base.add(PREFIX)))
        }
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>) {
        let base = ptr.as_ptr().sub(PREFIX);
        let total = base.cast::<usize>().read();
        let layout = Layout::from_size_align_unchecked(total, ALIGN);
        std::alloc::dealloc(base, layout);
    }
}

impl<A: RawAlloc + ?Sized> RawAlloc for &A {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).alloc(size)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>) {
        (**self).dealloc(ptr)
    }
}
