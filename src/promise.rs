/*
 * Copyright 2020 Joyent, Inc.
 */

//! A single-assignment result container with continuations.
//!
//! A [`Promise`] is completed exactly once, either with a value or with an
//! [`Error`]. Completion wakes every thread blocked in [`Promise::get`] and
//! runs every registered continuation exactly once. Continuations registered
//! before completion run on the completing thread; continuations registered
//! afterwards run immediately on the registering thread. No continuation is
//! ever invoked while the promise's internal lock is held, so a continuation
//! may freely complete other promises, close connections or register more
//! continuations on the same promise.
//!
//! Cancellation is a failed completion with
//! [`ResultCode::ClientSideUserCancelled`](../error/enum.ResultCode.html).
//! A thread blocked in `get` when the promise is cancelled observes that
//! failure, which is how a blocking wait is interrupted.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::error::{Error, ResultCode};

/// The request id of a promise that is not associated with a request.
pub const NO_REQUEST_ID: i32 = -1;

type Callback<T> = Box<dyn FnOnce(&Result<T, Error>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        cancel_hooks: Vec<CancelHook>,
    },
    Done(Result<T, Error>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    request_id: i32,
}

/// A handle to the eventual outcome of an operation. Clones share the same
/// underlying result.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let done = matches!(
            *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Done(_)
        );
        f.debug_struct("Promise")
            .field("request_id", &self.inner.request_id)
            .field("done", &done)
            .finish()
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_request_id(NO_REQUEST_ID)
    }

    pub fn with_request_id(request_id: i32) -> Self {
        Promise {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    callbacks: Vec::new(),
                    cancel_hooks: Vec::new(),
                }),
                done: Condvar::new(),
                request_id,
            }),
        }
    }

    /// An already successful promise.
    pub fn completed(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already failed promise.
    pub fn failed(error: Error) -> Self {
        Self::from_result(Err(error))
    }

    pub fn from_result(result: Result<T, Error>) -> Self {
        let promise = Self::new();
        promise.set_result(result);
        promise
    }

    /// The id of the request this promise tracks, or `NO_REQUEST_ID`.
    pub fn request_id(&self) -> i32 {
        self.inner.request_id
    }

    fn lock(&self) -> MutexGuard<State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn complete(&self, value: T) -> bool {
        self.set_result(Ok(value))
    }

    pub fn fail(&self, error: Error) -> bool {
        self.set_result(Err(error))
    }

    /// Complete the promise. Only the first completion takes effect; the
    /// return value says whether this call was the one that did.
    pub fn set_result(&self, result: Result<T, Error>) -> bool {
        match self.finish(result.clone()) {
            Some((callbacks, _)) => {
                for callback in callbacks {
                    callback(&result);
                }
                true
            }
            None => false,
        }
    }

    /// Cancel the pending operation. The promise fails with a cancellation
    /// error and the registered cancel hooks run, giving the owner of the
    /// operation a chance to abandon it. Returns `false` if the promise had
    /// already completed.
    pub fn cancel(&self) -> bool {
        let result = Err(Error::cancelled());
        match self.finish(result.clone()) {
            Some((callbacks, hooks)) => {
                for hook in hooks {
                    hook();
                }
                for callback in callbacks {
                    callback(&result);
                }
                true
            }
            None => false,
        }
    }

    fn finish(
        &self,
        result: Result<T, Error>,
    ) -> Option<(Vec<Callback<T>>, Vec<CancelHook>)> {
        let previous = {
            let mut state = self.lock();
            if let State::Done(_) = *state {
                return None;
            }
            std::mem::replace(&mut *state, State::Done(result))
        };
        self.inner.done.notify_all();
        match previous {
            State::Pending {
                callbacks,
                cancel_hooks,
            } => Some((callbacks, cancel_hooks)),
            State::Done(_) => None,
        }
    }

    /// Register a hook run when the promise is cancelled. Hooks registered
    /// after completion are discarded.
    pub fn on_cancel<F>(&self, hook: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        if let State::Pending { cancel_hooks, .. } = &mut *self.lock() {
            cancel_hooks.push(Box::new(hook));
        }
        self
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), State::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        match &*self.lock() {
            State::Done(Err(e)) => e.code() == ResultCode::ClientSideUserCancelled,
            _ => false,
        }
    }

    /// The outcome, if the promise has completed.
    pub fn try_get(&self) -> Option<Result<T, Error>> {
        match &*self.lock() {
            State::Done(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Block until the promise completes and return its outcome.
    pub fn get(&self) -> Result<T, Error> {
        let mut state = self.lock();
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            state = self
                .inner
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`. Expiry fails the wait, not the promise.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let mut state = self.lock();
        if let State::Done(result) = &*state {
            return result.clone();
        }
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                drop(state);
                return self.get();
            }
        };
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timed_out(timeout.as_millis() as u64));
            }
            state = self
                .inner
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Register a continuation for either outcome.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Result<T, Error>) + Send + 'static,
    {
        let result = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return self;
                }
                State::Done(result) => result.clone(),
            }
        };
        callback(&result);
        self
    }

    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete(move |result| {
            if let Ok(value) = result {
                callback(value)
            }
        })
    }

    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.on_complete(move |result| {
            if let Err(error) = result {
                callback(error)
            }
        })
    }

    /// Derive a promise by transforming the value. A failure passes through
    /// unchanged.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.then_or_else(f, Err)
    }

    /// Derive a promise, mapping both the value and the failure.
    pub fn then_or_else<U, F, G>(&self, on_value: F, on_error: G) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
        G: FnOnce(Error) -> Result<U, Error> + Send + 'static,
    {
        let derived = Promise::with_request_id(self.request_id());
        self.cancel_with(&derived);
        let target = derived.clone();
        self.on_complete(move |result| {
            let next = match result {
                Ok(value) => on_value(value.clone()),
                Err(error) => on_error(error.clone()),
            };
            target.set_result(next);
        });
        derived
    }

    /// Derive a promise from a follow-up asynchronous operation started with
    /// the value.
    pub fn then_async<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.then_async_or_else(f, Promise::<U>::failed)
    }

    pub fn then_async_or_else<U, F, G>(&self, on_value: F, on_error: G) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
        G: FnOnce(Error) -> Promise<U> + Send + 'static,
    {
        let derived = Promise::with_request_id(self.request_id());
        self.cancel_with(&derived);
        let target = derived.clone();
        self.on_complete(move |result| {
            let next = match result {
                Ok(value) => on_value(value.clone()),
                Err(error) => on_error(error.clone()),
            };
            next.cancel_with(&target);
            next.forward_to(target);
        });
        derived
    }

    /// Complete `target` with this promise's outcome.
    pub fn forward_to(&self, target: Promise<T>) {
        self.on_complete(move |result| {
            target.set_result(result.clone());
        });
    }

    // Cancelling `derived` cancels this promise too. The hook holds a weak
    // reference so a never-completed chain does not keep itself alive.
    fn cancel_with<U>(&self, derived: &Promise<U>)
    where
        U: Clone + Send + 'static,
    {
        let source: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        derived.on_cancel(move || {
            if let Some(inner) = source.upgrade() {
                Promise { inner }.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_completion_is_ignored() {
        let promise = Promise::new();
        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert!(!promise.fail(Error::cancelled()));
        assert_eq!(promise.get(), Ok(1));
    }

    #[test]
    fn late_continuation_runs_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::completed("done");
        let calls_clone = calls.clone();
        promise.on_success(move |v| {
            assert_eq!(*v, "done");
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn then_passes_failure_through() {
        let promise: Promise<u32> = Promise::new();
        let derived = promise.then(|v| Ok(v.to_string()));
        promise.fail(Error::server_down("gone"));
        assert_eq!(
            derived.get().unwrap_err().code(),
            ResultCode::ClientSideServerDown
        );
    }

    #[test]
    fn cancelling_derived_cancels_source() {
        let source: Promise<u32> = Promise::with_request_id(7);
        let derived = source.then(|v| Ok(v + 1));
        assert_eq!(derived.request_id(), 7);
        assert!(derived.cancel());
        assert!(source.is_cancelled());
        assert!(derived.is_cancelled());
    }

    #[test]
    fn wait_timeout_does_not_complete() {
        let promise: Promise<u32> = Promise::new();
        let err = promise.get_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.code(), ResultCode::ClientSideTimeout);
        assert!(!promise.is_done());
    }

    #[test]
    fn unbounded_wait_timeout() {
        assert_eq!(Promise::completed(1).get_timeout(Duration::MAX), Ok(1));

        let promise: Promise<u32> = Promise::new();
        let completer = promise.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(5);
        });
        assert_eq!(promise.get_timeout(Duration::MAX), Ok(5));
        handle.join().unwrap();
    }
}
