//! Lock variants and cooperative backoff ("slumber") strategies
//!
//! The lock capability is [`lock_api::RawMutex`] — lock, try_lock, unlock —
//! so anything generic over a lock accepts the spin lock, the no-op lock, or
//! the parking-lot system lock interchangeably, and scoped acquisition comes
//! from [`lock_api::Mutex`] guards.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::constants::{DEFAULT_PROGRESSIVE_SPIN_LIMIT, DEFAULT_SLUMBER_SLEEP};

/// Test-and-set spin lock with a relaxed-read hot spin.
///
/// Acquisition exchanges the flag with acquire ordering; while contended it
/// spins on relaxed loads with a CPU relax hint so the owning core keeps the
/// cache line in shared state.
pub struct SpinLock {
    locked: AtomicBool,
}

unsafe impl lock_api::RawMutex for SpinLock {
    const INIT: SpinLock = SpinLock {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        loop {
            // Maybe we get lucky on the first try.
            if !self.locked.swap(true, Ordering::Acquire) {
                return;
            }
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.locked.load(Ordering::Relaxed) && !self.locked.swap(true, Ordering::Acquire)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// No-op lock for single-threaded clients; compiles down to nothing.
pub struct NoopLock;

unsafe impl lock_api::RawMutex for NoopLock {
    const INIT: NoopLock = NoopLock;

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {}

    #[inline]
    fn try_lock(&self) -> bool {
        true
    }

    #[inline]
    unsafe fn unlock(&self) {}
}

/// The operating-system lock variant.
pub type SystemLock = parking_lot::RawMutex;

/// Mutex over any lock variant.
pub type RtMutex<R, T> = lock_api::Mutex<R, T>;

/// Mutex over the spin lock.
pub type SpinMutex<T> = lock_api::Mutex<SpinLock, T>;

/// Mutex over the no-op lock.
pub type NoopMutex<T> = lock_api::Mutex<NoopLock, T>;

/// Mutex over the system lock.
pub type SysMutex<T> = parking_lot::Mutex<T>;

/// Cooperative-waiting capability: each call to `wait` gives the scheduler
/// (or the CPU) a chance to do something else.
pub trait Slumber {
    /// Yields cooperatively once.
    fn wait(&mut self);
}

/// Slumber that yields the thread to the OS scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldSlumber;

impl Slumber for YieldSlumber {
    #[inline]
    fn wait(&mut self) {
        thread::yield_now();
    }
}

/// Slumber that sleeps for a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct SleepSlumber {
    duration: Duration,
}

impl SleepSlumber {
    /// Creates a slumber sleeping `duration` per wait.
    pub const fn new(duration: Duration) -> SleepSlumber {
        SleepSlumber { duration }
    }
}

impl Default for SleepSlumber {
    fn default() -> SleepSlumber {
        SleepSlumber::new(DEFAULT_SLUMBER_SLEEP)
    }
}

impl Slumber for SleepSlumber {
    #[inline]
    fn wait(&mut self) {
        thread::sleep(self.duration);
    }
}

/// Slumber that burns a bounded number of CPU relax hints before it starts
/// sleeping; good when the awaited event usually arrives within microseconds
/// but may occasionally take much longer.
#[derive(Debug, Clone, Copy)]
pub struct ProgressiveSlumber {
    spins: u32,
    max_spins: u32,
    sleep: SleepSlumber,
}

impl ProgressiveSlumber {
    /// Creates a progressive slumber with a custom spin budget.
    pub const fn new(max_spins: u32) -> ProgressiveSlumber {
        ProgressiveSlumber {
            spins: 0,
            max_spins,
            sleep: SleepSlumber::new(DEFAULT_SLUMBER_SLEEP),
        }
    }

    /// Creates a progressive slumber with a custom spin budget and nap length.
    pub const fn with_sleep(max_spins: u32, sleep: Duration) -> ProgressiveSlumber {
        ProgressiveSlumber {
            spins: 0,
            max_spins,
            sleep: SleepSlumber::new(sleep),
        }
    }
}

impl Default for ProgressiveSlumber {
    fn default() -> ProgressiveSlumber {
        ProgressiveSlumber::new(DEFAULT_PROGRESSIVE_SPIN_LIMIT)
    }
}

impl Slumber for ProgressiveSlumber {
    #[inline]
    fn wait(&mut self) {
        if self.spins < self.max_spins {
            self.spins += 1;
            hint::spin_loop();
        } else {
            self.sleep.wait();
        }
    }
}
