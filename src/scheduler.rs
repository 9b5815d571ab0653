/*
 * Copyright 2020 Joyent, Inc.
 */

//! Timer-driven execution of background tasks such as health probes.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::shared::SharedResource;

/// The scheduler used when the caller does not provide one.
pub static DEFAULT_SCHEDULER: SharedResource<Scheduler> = SharedResource::new(Scheduler::new);

/// A single timer thread that runs scheduled tasks.
///
/// Tasks run on the timer thread and should not block for long: a slow
/// task delays every other task scheduled on the same scheduler.
pub struct Scheduler {
    timer: Mutex<timer::Timer>,
}

/// A handle to a scheduled task. Dropping the handle cancels the task.
pub struct ScheduledTask {
    guard: timer::Guard,
}

impl ScheduledTask {
    /// Stop the task. A run already in progress completes.
    pub fn cancel(self) {
        drop(self.guard);
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    let millis = duration.as_millis().min(u128::from(u32::MAX));
    chrono::Duration::milliseconds(millis as i64)
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            timer: Mutex::new(timer::Timer::new()),
        }
    }

    /// Run `task` every `interval`, the first time one interval from now.
    pub fn schedule_repeating<F>(&self, interval: Duration, task: F) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        ScheduledTask {
            guard: timer.schedule_repeating(to_chrono(interval), task),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
