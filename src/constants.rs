//! Tuning constants shared across the crate

use std::time::Duration;

/// Default maximum load factor of the hash table, in percent.
///
/// The map uses chaining, so the useful range is well above 100; 500 means an
/// average chain length of five before a resize begins.
pub const DEFAULT_MAX_LOAD_FACTOR_PERCENT: usize = 500;

/// Upper bound on entries migrated from the primary to the secondary table
/// per public hash-table operation while a transfer is in progress.
pub const TRANSFER_QUOTA: usize = 512;

/// Bucket-count exponent a fresh hash table starts with (`prime >= 2^4`).
pub const INITIAL_BUCKET_POW2: u8 = 4;

/// Largest supported bucket-count exponent (`prime >= 2^31`).
pub const MAX_BUCKET_POW2: u8 = 31;

/// Default batch size an object pool refills by when it runs empty.
pub const DEFAULT_POOL_ELASTICITY: usize = 1;

/// Spin iterations the progressive slumber burns before it starts sleeping.
pub const DEFAULT_PROGRESSIVE_SPIN_LIMIT: u32 = 3500;

/// Default nap length of the sleeping slumber variants.
pub const DEFAULT_SLUMBER_SLEEP: Duration = Duration::from_micros(200);
