//! Anonymous-mapping backing region
//!
//! The usual source of an arena's buffer: a private anonymous read/write
//! mapping obtained from the kernel and released on drop. Orthogonal to the
//! allocator itself — any sufficiently aligned region works.

use std::ptr::NonNull;

use crate::error::{RegionError, RegionResult};

/// A lazily mapped memory region.
///
/// `init` must be called before the buffer can be used; `uninit` (or drop)
/// releases the mapping and invalidates every pointer into it.
#[derive(Debug)]
pub struct MmapRegion {
    buf: *mut u8,
    capacity: usize,
    initialized: bool,
}

// The region is a plain span of private memory; moving the owning handle
// between threads is fine.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Creates an unmapped region handle.
    pub const fn new() -> MmapRegion {
        MmapRegion {
            buf: std::ptr::null_mut(),
            capacity: 0,
            initialized: false,
        }
    }

    /// Maps `capacity` bytes of anonymous private memory.
    ///
    /// Idempotent: an already mapped region reports success and keeps its
    /// existing mapping.
    pub fn init(&mut self, capacity: usize) -> RegionResult<()> {
        if self.initialized {
            return Ok(());
        }
        if capacity == 0 {
            return Err(RegionError::ZeroCapacity);
        }

        let buf = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if buf == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(RegionError::MapFailed { errno });
        }

        self.buf = buf.cast::<u8>();
        self.capacity = capacity;
        self.initialized = true;
        tracing::debug!(capacity, "mapped anonymous region");
        Ok(())
    }

    /// Releases the mapping. Pointers into the region become invalid.
    pub fn uninit(&mut self) {
        if !self.initialized {
            return;
        }
        unsafe {
            libc::munmap(self.buf.cast(), self.capacity);
        }
        self.buf = std::ptr::null_mut();
        self.capacity = 0;
        self.initialized = false;
    }

    /// Base of the mapping, or `None` while unmapped.
    pub fn as_ptr(&self) -> Option<NonNull<u8>> {
        if self.initialized {
            NonNull::new(self.buf)
        } else {
            None
        }
    }

    /// Mapped capacity in bytes; zero while unmapped.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True while the region is mapped.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Default for MmapRegion {
    fn default() -> MmapRegion {
        MmapRegion::new()
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        self.uninit();
    }
}
