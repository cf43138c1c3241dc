//! Real-time memory and container toolkit
//!
//! Building blocks for latency-sensitive systems that cannot tolerate
//! unbounded allocation pauses:
//! - TLSF arena with constant-time allocate/free over a caller-supplied region
//! - Lock-free SPSC byte ring with contiguous-region I/O
//! - Allocator-aware containers (vector, amortized-rehash map, object pool, LRU)
//! - Strong/weak shared handles with atomic reference counts
//! - Lock and backoff primitives, plus a condvar-driven periodic task
//!
//! Every container allocates exclusively through the [`RawAlloc`] capability,
//! so a whole subsystem can be pinned to one pre-sized arena and never touch
//! the global heap after startup.

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("rtcore supports 32-bit and 64-bit targets only");

pub mod alloc;
pub mod constants;
pub mod error;
pub mod hash;
pub mod lru;
pub mod map;
pub mod pool;
pub mod rc;
#[cfg(unix)]
pub mod region;
pub mod ring;
pub mod sync;
pub mod task;
pub mod tlsf;
pub mod vec;

pub use alloc::{RawAlloc, RtAlloc, RtAllocMt, RtAllocSt, SystemAlloc};
pub use error::{ArenaError, RegionError};
pub use hash::{fnv1a, prime_for_pow2, RtHash};
pub use lru::LruCache;
pub use map::{MapState, RtHashMap};
pub use pool::{ObjectPool, PoolGuard};
pub use rc::{RtBox, RtBoxArray, RtRc, RtRcArray, RtWeak};
#[cfg(unix)]
pub use region::MmapRegion;
pub use ring::{Consumer, Producer, SpscRing};
pub use sync::{
    NoopLock, NoopMutex, ProgressiveSlumber, SleepSlumber, Slumber, SpinLock, SpinMutex,
    SysMutex, SystemLock,
};
pub use task::{PeriodicTask, SchedPolicy, TaskNotifier, TaskOptions, TaskStatus};
pub use tlsf::TlsfArena;
pub use vec::RtVec;
