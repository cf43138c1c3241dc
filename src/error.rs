//! Error types for fallible constructors
//!
//! Hot paths report failure through `Option`/`bool` sentinels and never
//! allocate; these enums cover the cold setup paths only.

use thiserror::Error;

/// Errors from arena construction over a caller-supplied region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The region base address is not aligned to the allocation granularity.
    #[error("region base is not aligned to {align} bytes")]
    Misaligned {
        /// Required base alignment in bytes
        align: usize,
    },

    /// The region is too small to hold the arena header and one free block.
    #[error("region of {size} bytes is below the minimum arena size of {minimum}")]
    TooSmall {
        /// Provided region size
        size: usize,
        /// Minimum supported region size
        minimum: usize,
    },

    /// The region exceeds what the size-class index can address.
    #[error("region of {size} bytes exceeds the maximum arena size of {maximum}")]
    TooLarge {
        /// Provided region size
        size: usize,
        /// Maximum supported region size
        maximum: usize,
    },
}

/// Errors from the anonymous-mapping region wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
    /// A zero-byte mapping was requested.
    #[error("cannot map a zero-byte region")]
    ZeroCapacity,

    /// The kernel refused the mapping.
    #[error("anonymous mapping failed (errno {errno})")]
    MapFailed {
        /// `errno` reported by the failed `mmap` call
        errno: i32,
    },
}

/// Result alias for arena construction.
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Result alias for region mapping.
pub type RegionResult<T> = Result<T, RegionError>;
