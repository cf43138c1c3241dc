//! Periodic worker task with condition-variable wake-ups
//!
//! Owns one background thread that runs a callable in a loop. Between
//! iterations the worker parks on a condvar, either indefinitely or with a
//! configured timeout; shutdown is a flag set under the mutex followed by a
//! notify. Scheduling policy and priority can optionally be applied to the
//! worker before the first iteration.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// What the callable wants the worker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Park on the condvar, then run again.
    Continue,
    /// Exit the worker loop.
    Done,
}

/// OS scheduling class and priority for the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedPolicy {
    /// Policy constant (`libc::SCHED_FIFO`, `libc::SCHED_RR`, ...)
    pub policy: i32,
    /// Priority within the policy
    pub priority: i32,
}

/// Start-time options for a [`PeriodicTask`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Scheduling parameters applied on the worker before the first
    /// iteration; errors abort the worker (see
    /// [`PeriodicTask::errored_out`]).
    pub sched: Option<SchedPolicy>,
    /// Upper bound on each condvar wait; `None` waits until notified.
    pub wait_timeout: Option<Duration>,
}

struct Shared {
    lock: Mutex<bool>,
    wake: Condvar,
    error: AtomicI32,
}

/// Cloneable handle other threads use to wake a task's worker.
#[derive(Clone)]
pub struct TaskNotifier {
    shared: Arc<Shared>,
}

impl TaskNotifier {
    /// Wakes one parked worker iteration.
    pub fn notify_one(&self) {
        self.shared.wake.notify_one();
    }

    /// Wakes all waiters on the task's condvar.
    pub fn notify_all(&self) {
        self.shared.wake.notify_all();
    }
}

/// A background worker running `call` in a loop.
///
/// Each iteration runs the callable; [`TaskStatus::Done`] ends the loop,
/// otherwise the worker checks the shutdown flag under the mutex and parks
/// on the condvar. Dropping the task signals shutdown and joins the worker.
pub struct PeriodicTask<F>
where
    F: FnMut() -> TaskStatus + Send + 'static,
{
    shared: Arc<Shared>,
    call: Option<F>,
    worker: Option<JoinHandle<()>>,
    options: TaskOptions,
    started: bool,
}

impl<F> PeriodicTask<F>
where
    F: FnMut() -> TaskStatus + Send + 'static,
{
    /// Creates a task with default options; nothing runs until
    /// [`PeriodicTask::start`].
    pub fn new(call: F) -> PeriodicTask<F> {
        Self::with_options(call, TaskOptions::default())
    }

    /// Creates a task with explicit options.
    pub fn with_options(call: F, options: TaskOptions) -> PeriodicTask<F> {
        PeriodicTask {
            shared: Arc::new(Shared {
                lock: Mutex::new(false),
                wake: Condvar::new(),
                error: AtomicI32::new(0),
            }),
            call: Some(call),
            worker: None,
            options,
            started: false,
        }
    }

    /// Spawns the worker thread. A second call is a no-op: once started, a
    /// task cannot be started again.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let shared = Arc::clone(&self.shared);
        let options = self.options;
        let call = self.call.take().expect("callable consumed before start");
        tracing::debug!(?options, "starting periodic task worker");
        self.worker = Some(std::thread::spawn(move || worker_loop(&shared, options, call)));
    }

    /// Sets the shutdown flag under the mutex and wakes the worker.
    pub fn signal_shutdown(&self) {
        {
            let mut shutdown = self.shared.lock.lock();
            *shutdown = true;
        }
        // Notify outside the lock so the worker does not wake into a held
        // mutex.
        self.shared.wake.notify_one();
    }

    /// Blocks until the worker exits. No-op when the task never started.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// True when applying the scheduling parameters failed and the worker
    /// exited before the first iteration.
    pub fn errored_out(&self) -> bool {
        self.error_code() != 0
    }

    /// `errno` from the failed scheduling call, or 0.
    pub fn error_code(&self) -> i32 {
        self.shared.error.load(Ordering::Acquire)
    }

    /// Handle for waking the worker from other threads.
    pub fn notifier(&self) -> TaskNotifier {
        TaskNotifier {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wakes one parked worker iteration.
    pub fn notify_one(&self) {
        self.shared.wake.notify_one();
    }

    /// Wakes all waiters on the task's condvar.
    pub fn notify_all(&self) {
        self.shared.wake.notify_all();
    }
}

impl<F> Drop for PeriodicTask<F>
where
    F: FnMut() -> TaskStatus + Send + 'static,
{
    fn drop(&mut self) {
        self.signal_shutdown();
        self.join();
    }
}

fn worker_loop<F>(shared: &Shared, options: TaskOptions, mut call: F)
where
    F: FnMut() -> TaskStatus,
{
    if let Some(sched) = options.sched {
        if let Err(errno) = apply_sched_policy(sched) {
            shared.error.store(errno, Ordering::Release);
            tracing::warn!(errno, "scheduling setup failed; task worker exiting");
            return;
        }
    }

    loop {
        if call() == TaskStatus::Done {
            break;
        }
        let mut shutdown = shared.lock.lock();
        if *shutdown {
            break;
        }
        match options.wait_timeout {
            None => {
                shared.wake.wait(&mut shutdown);
            }
            Some(timeout) => {
                let _ = shared.wake.wait_for(&mut shutdown, timeout);
            }
        }
        if *shutdown {
            break;
        }
    }
    tracing::debug!("periodic task worker exited");
}

#[cfg(unix)]
fn apply_sched_policy(sched: SchedPolicy) -> Result<(), i32> {
    let param = libc::sched_param {
        sched_priority: sched.priority,
    };
    let rval = unsafe { libc::pthread_setschedparam(libc::pthread_self(), sched.policy, &param) };
    if rval != 0 {
        return Err(rval);
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_sched_policy(_sched: SchedPolicy) -> Result<(), i32> {
    // No scheduling-policy surface on this platform.
    Err(-1)
}
