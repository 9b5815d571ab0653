/*
 * Copyright 2020 Joyent, Inc.
 */

//! A single background thread that enforces deadlines for every registered
//! participant.
//!
//! Each pass takes the current time and calls
//! [`TimeoutEventListener::handle_timeout`] on every listener. A listener
//! returns the number of milliseconds until it next needs to be called, or
//! `0` to be deregistered. The thread then sleeps until the soonest of those
//! delays. Registering a listener records its timeout as a candidate delay
//! and wakes the thread, so a deadline introduced during a long sleep is not
//! missed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use slog::{debug, error, o, trace, Drain, Logger};

use crate::shared::{ListenerSet, SharedResource};

/// The timeout checker shared by every connection in the process.
pub static TIMEOUT_CHECKER: SharedResource<TimeoutChecker> =
    SharedResource::new(TimeoutChecker::new);

/// A participant in deadline enforcement.
pub trait TimeoutEventListener: Send + Sync {
    /// The fixed timeout in milliseconds. It must not change once the
    /// listener has been registered.
    fn timeout(&self) -> u64;

    /// Handle deadlines that have passed by `current_time`, a value of
    /// [`now_millis`]. Returns the delay in milliseconds until the next
    /// call is needed, or `0` to deregister.
    fn handle_timeout(&self, current_time: u64) -> u64;
}

/// Milliseconds on a monotonic clock shared by the checker and its
/// listeners.
pub fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

const NO_DELAY: u64 = u64::MAX;

struct WakeState {
    shutdown: bool,
    // Smallest timeout of the listeners registered since the last pass
    // started.
    pending_delay: u64,
}

struct Shared {
    listeners: ListenerSet<dyn TimeoutEventListener>,
    wake: Mutex<WakeState>,
    signal: Condvar,
    log: Logger,
}

impl Shared {
    fn lock(&self) -> MutexGuard<WakeState> {
        self.wake.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct TimeoutChecker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutChecker {
    pub fn new() -> Self {
        Self::with_logger(None)
    }

    pub fn with_logger(log: Option<Logger>) -> Self {
        let log = log.unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        let shared = Arc::new(Shared {
            listeners: ListenerSet::new(),
            wake: Mutex::new(WakeState {
                shutdown: false,
                pending_delay: NO_DELAY,
            }),
            signal: Condvar::new(),
            log,
        });

        let shared_clone = shared.clone();
        let thread = thread::Builder::new()
            .name(String::from("timeout-checker"))
            .spawn(move || check_loop(shared_clone));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(shared.log, "failed to start timeout checker thread: {}", e);
                None
            }
        };

        TimeoutChecker { shared, thread }
    }

    /// Register a listener. Registering the same listener twice has no
    /// effect.
    pub fn add_listener(&self, listener: Arc<dyn TimeoutEventListener>) {
        let timeout = listener.timeout();
        if !self.shared.listeners.insert(listener) {
            return;
        }
        let mut wake = self.shared.lock();
        if timeout > 0 {
            wake.pending_delay = wake.pending_delay.min(timeout);
        }
        self.shared.signal.notify_all();
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TimeoutEventListener>) {
        if self.shared.listeners.remove(listener) {
            let _wake = self.shared.lock();
            self.shared.signal.notify_all();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }
}

impl Default for TimeoutChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutChecker {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.signal.notify_all();

        if let Some(handle) = self.thread.take() {
            // The last reference can be released by a listener running on
            // the checker thread itself; that thread exits on its own.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn check_loop(shared: Arc<Shared>) {
    debug!(shared.log, "timeout checker started");
    loop {
        {
            let mut wake = shared.lock();
            if wake.shutdown {
                break;
            }
            wake.pending_delay = NO_DELAY;
        }

        let now = now_millis();
        let mut delay = NO_DELAY;
        for listener in shared.listeners.snapshot().iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.handle_timeout(now)));
            match outcome {
                Ok(0) => {
                    shared.listeners.remove(listener);
                }
                Ok(next) => delay = delay.min(next),
                Err(_) => {
                    error!(shared.log, "timeout listener panicked, continuing");
                }
            }
        }

        let wake = shared.lock();
        if wake.shutdown {
            break;
        }
        delay = delay.min(wake.pending_delay);
        if delay == NO_DELAY {
            trace!(shared.log, "no deadlines, waiting for listeners");
            let _wake = shared
                .signal
                .wait(wake)
                .unwrap_or_else(PoisonError::into_inner);
        } else {
            trace!(shared.log, "next deadline in {} ms", delay);
            let _wake = shared
                .signal
                .wait_timeout(wake, Duration::from_millis(delay))
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
    debug!(shared.log, "timeout checker stopped");
}
