//! Lock-free SPSC byte ring with contiguous-region I/O
//!
//! A single-producer/single-consumer byte queue over a caller-supplied
//! buffer:
//! - Bulk copy in/out (`write`, `write_bytes`, `read`), split across the wrap
//! - Zero-copy contiguous regions (`alloc_contig`/`commit_write`,
//!   `read_contig`/`commit_read`) for callers that need unbroken spans
//! - Acquire/release index publication only; payload bytes ride on the index
//!   fences
//!
//! One cell is reserved to tell full from empty, so a buffer of `N` bytes
//! holds `N - 1`. The producer and consumer endpoints come from
//! [`SpscRing::split`]; each is `Send`, so the two sides can live on
//! different threads, and the type system keeps each side single-owner.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

/// SPSC byte ring over a borrowed buffer.
///
/// The ring never owns the buffer; it is a view with two atomic indices.
/// Capacity is limited to `u32::MAX` bytes.
#[derive(Debug)]
pub struct SpscRing<'buf> {
    buf: NonNull<u8>,
    capacity: u32,
    writable: u32,
    read_index: CachePadded<AtomicU32>,
    write_index: CachePadded<AtomicU32>,
    _buffer: PhantomData<&'buf mut [u8]>,
}

unsafe impl Send for SpscRing<'_> {}
// Shared references only expose the atomic index queries; buffer bytes are
// reached exclusively through the split endpoints.
unsafe impl Sync for SpscRing<'_> {}

/// Writable span granted by [`Producer::alloc_contig`].
///
/// `data.len()` is the number of bytes that may be produced; when it is
/// smaller than the requested length, `at_end_of_buffer` tells whether the
/// limit is the physical end of the buffer (waiting will not enlarge the
/// span) or the reader's position (waiting may help).
#[derive(Debug)]
pub struct WriteRegion<'p> {
    /// Contiguous bytes to produce into
    pub data: &'p mut [u8],
    /// True when the span is capped by the physical end of the buffer
    pub at_end_of_buffer: bool,
}

/// Pair of writable spans granted by [`Producer::compound_alloc_contig`].
///
/// Exactly one of three shapes: both spans empty (ring full), first span
/// only (no wrap available), or both spans (the second starts at the buffer
/// base once the first reaches the physical end).
#[derive(Debug)]
pub struct CompoundWriteRegion<'p> {
    /// Span from the write index toward the end of the buffer
    pub first: &'p mut [u8],
    /// Span from the buffer base, when a wrap is available
    pub second: &'p mut [u8],
    /// True when the write index is at or ahead of the read index
    pub write_ahead_of_read: bool,
}

/// Readable span granted by [`Consumer::read_contig`].
#[derive(Debug)]
pub struct ReadRegion<'p> {
    /// Contiguous bytes available to consume
    pub data: &'p [u8],
    /// True when the span is capped by the physical end of the buffer
    pub at_end_of_buffer: bool,
}

impl<'buf> SpscRing<'buf> {
    /// Wraps `buf` as a ring. A buffer of `N` bytes holds `N - 1`.
    pub fn new(buf: &'buf mut [u8]) -> SpscRing<'buf> {
        let capacity = u32::try_from(buf.len()).expect("ring buffer capacity exceeds u32");
        SpscRing {
            // Safety: slices are non-null even when empty.
            buf: unsafe { NonNull::new_unchecked(buf.as_mut_ptr()) },
            capacity,
            writable: capacity.saturating_sub(1),
            read_index: CachePadded::new(AtomicU32::new(0)),
            write_index: CachePadded::new(AtomicU32::new(0)),
            _buffer: PhantomData,
        }
    }

    /// Splits the ring into its single-producer and single-consumer
    /// endpoints. The borrow ties both to the ring, so neither can outlive
    /// it and no second pair can be created while these are alive.
    pub fn split(&mut self) -> (Producer<'_, 'buf>, Consumer<'_, 'buf>) {
        (Producer { ring: self }, Consumer { ring: self })
    }

    /// Number of bytes the ring can hold (`buffer length - 1`).
    #[inline]
    pub fn writable_capacity(&self) -> u32 {
        self.writable
    }

    /// True when the read index has caught up with the write index.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_index.load(Ordering::Acquire) == self.write_index.load(Ordering::Acquire)
    }

    /// Approximate number of buffered bytes; an in-flight write makes the
    /// result an undercount, an in-flight read an overcount.
    #[inline]
    pub fn approx_len(&self) -> u32 {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        self.bytes_written(w, r)
    }

    /// Approximate free bytes; the same caveats as [`SpscRing::approx_len`].
    #[inline]
    pub fn approx_free(&self) -> u32 {
        self.writable - self.approx_len()
    }

    #[inline]
    fn bytes_written(&self, write_index: u32, read_index: u32) -> u32 {
        if write_index >= read_index {
            write_index - read_index
        } else {
            self.writable - read_index + 1 + write_index
        }
    }

    /// Largest contiguous run available to the writer, plus whether that run
    /// is capped by the physical end of the buffer.
    #[inline]
    fn contig_write_span(&self, write_index: u32, read_index: u32) -> (u32, bool) {
        if write_index >= read_index {
            let run = self.writable - write_index;
            if read_index != 0 {
                // The reader is past the base, so the reserved cell moves to
                // the wrap side and the run extends to the physical end.
                (run + 1, true)
            } else {
                (run, false)
            }
        } else {
            (read_index - write_index - 1, false)
        }
    }

    /// Copies `data` into the ring starting at `write_index`, splitting at
    /// the physical end when necessary.
    ///
    /// # Safety
    ///
    /// The caller must have verified that `data.len()` bytes are free from
    /// `write_index` and that it is the sole producer.
    unsafe fn copy_in(&self, data: &[u8], write_index: u32) {
        let first = data.len().min((self.capacity - write_index) as usize);
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            self.buf.as_ptr().add(write_index as usize),
            first,
        );
        std::ptr::copy_nonoverlapping(
            data.as_ptr().add(first),
            self.buf.as_ptr(),
            data.len() - first,
        );
    }

    /// Copies from the ring starting at `read_index` into `out`, splitting
    /// at the physical end when necessary.
    ///
    /// # Safety
    ///
    /// The caller must have verified that `out.len()` bytes are buffered from
    /// `read_index` and that it is the sole consumer.
    unsafe fn copy_out(&self, out: &mut [u8], read_index: u32) {
        let first = out.len().min((self.capacity - read_index) as usize);
        std::ptr::copy_nonoverlapping(
            self.buf.as_ptr().add(read_index as usize),
            out.as_mut_ptr(),
            first,
        );
        std::ptr::copy_nonoverlapping(
            self.buf.as_ptr(),
            out.as_mut_ptr().add(first),
            out.len() - first,
        );
    }
}

/// Writing endpoint of the ring. Exactly one exists per split.
#[derive(Debug)]
pub struct Producer<'r, 'buf> {
    ring: &'r SpscRing<'buf>,
}

impl<'r, 'buf> Producer<'r, 'buf> {
    /// All-or-nothing write: fails when `input` does not fit in the free
    /// space, otherwise buffers every byte. Zero-length writes succeed.
    pub fn write(&mut self, input: &[u8]) -> bool {
        let ring = self.ring;
        let Ok(size) = u32::try_from(input.len()) else {
            return false;
        };
        if size > ring.writable {
            return false;
        }
        if size == 0 {
            return true;
        }

        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);
        let free = ring.writable - ring.bytes_written(write_index, read_index);
        if size > free {
            return false;
        }

        unsafe { ring.copy_in(input, write_index) };
        ring.write_index
            .store((write_index + size) % ring.capacity, Ordering::Release);
        true
    }

    /// Best-effort write: buffers `min(input.len(), free)` bytes and returns
    /// the number written.
    pub fn write_bytes(&mut self, input: &[u8]) -> u32 {
        let ring = self.ring;
        let mut size = input.len().min(ring.writable as usize) as u32;
        if size == 0 {
            return 0;
        }

        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);
        let free = ring.writable - ring.bytes_written(write_index, read_index);
        size = size.min(free);
        if size == 0 {
            return 0;
        }

        unsafe { ring.copy_in(&input[..size as usize], write_index) };
        ring.write_index
            .store((write_index + size) % ring.capacity, Ordering::Release);
        size
    }

    /// Grants a contiguous span of up to `want` bytes to produce into.
    ///
    /// The producer must call [`Producer::commit_write`] with the number of
    /// bytes actually written; until then the write is not visible. The
    /// region borrows the producer, so it cannot outlive the next call.
    pub fn alloc_contig(&mut self, want: u32) -> WriteRegion<'_> {
        let ring = self.ring;
        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);
        let (largest, at_end_of_buffer) = ring.contig_write_span(write_index, read_index);
        let granted = want.min(largest);
        let data = unsafe {
            slice::from_raw_parts_mut(
                ring.buf.as_ptr().add(write_index as usize),
                granted as usize,
            )
        };
        WriteRegion {
            data,
            at_end_of_buffer,
        }
    }

    /// Grants the maximum writable space as up to two contiguous spans: the
    /// run from the write index, and the run from the buffer base when a
    /// wrap is available. Commit with the total produced.
    pub fn compound_alloc_contig(&mut self) -> CompoundWriteRegion<'_> {
        let ring = self.ring;
        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);
        let write_ahead_of_read = write_index >= read_index;

        let free = ring.writable - ring.bytes_written(write_index, read_index);
        let (largest, _) = ring.contig_write_span(write_index, read_index);
        if largest == 0 {
            return CompoundWriteRegion {
                first: &mut [],
                second: &mut [],
                write_ahead_of_read,
            };
        }

        debug_assert!(largest <= free);
        let wrapped = free - largest;
        unsafe {
            let first = slice::from_raw_parts_mut(
                ring.buf.as_ptr().add(write_index as usize),
                largest as usize,
            );
            let second: &mut [u8] = if wrapped == 0 {
                &mut []
            } else {
                slice::from_raw_parts_mut(ring.buf.as_ptr(), wrapped as usize)
            };
            CompoundWriteRegion {
                first,
                second,
                write_ahead_of_read,
            }
        }
    }

    /// Publishes `size` bytes produced into a previously granted region.
    pub fn commit_write(&mut self, size: u32) {
        let ring = self.ring;
        if size == 0 || ring.capacity == 0 {
            return;
        }
        let write_index = ring.write_index.load(Ordering::Relaxed);
        ring.write_index
            .store((write_index + size) % ring.capacity, Ordering::Release);
    }

    /// See [`SpscRing::writable_capacity`].
    pub fn writable_capacity(&self) -> u32 {
        self.ring.writable_capacity()
    }

    /// See [`SpscRing::approx_free`].
    pub fn approx_free(&self) -> u32 {
        self.ring.approx_free()
    }

    /// See [`SpscRing::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Reading endpoint of the ring. Exactly one exists per split.
#[derive(Debug)]
pub struct Consumer<'r, 'buf> {
    ring: &'r SpscRing<'buf>,
}

impl<'r, 'buf> Consumer<'r, 'buf> {
    /// Copies up to `output.len()` buffered bytes into `output` and returns
    /// the number read.
    pub fn read(&mut self, output: &mut [u8]) -> u32 {
        let ring = self.ring;
        let mut size = output.len().min(ring.writable as usize) as u32;
        if size == 0 {
            return 0;
        }

        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);
        size = size.min(ring.bytes_written(write_index, read_index));
        if size == 0 {
            return 0;
        }

        unsafe { ring.copy_out(&mut output[..size as usize], read_index) };
        ring.read_index
            .store((read_index + size) % ring.capacity, Ordering::Release);
        size
    }

    /// Grants a contiguous span of up to `want` buffered bytes.
    ///
    /// The consumer must call [`Consumer::commit_read`] with the number of
    /// bytes actually consumed; until then the read is not visible.
    pub fn read_contig(&mut self, want: u32) -> ReadRegion<'_> {
        let ring = self.ring;
        let write_index = ring.write_index.load(Ordering::Acquire);
        let read_index = ring.read_index.load(Ordering::Acquire);

        let (largest, at_end_of_buffer) = if write_index >= read_index {
            (write_index - read_index, false)
        } else {
            (ring.writable - read_index + 1, true)
        };
        let granted = want.min(largest);
        let data = unsafe {
            slice::from_raw_parts(ring.buf.as_ptr().add(read_index as usize), granted as usize)
        };
        ReadRegion {
            data,
            at_end_of_buffer,
        }
    }

    /// Publishes `size` bytes consumed from a previously granted region.
    pub fn commit_read(&mut self, size: u32) {
        let ring = self.ring;
        if size == 0 || ring.capacity == 0 {
            return;
        }
        let read_index = ring.read_index.load(Ordering::Relaxed);
        ring.read_index
            .store((read_index + size) % ring.capacity, Ordering::Release);
    }

    /// See [`SpscRing::approx_len`].
    pub fn approx_len(&self) -> u32 {
        self.ring.approx_len()
    }

    /// See [`SpscRing::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
