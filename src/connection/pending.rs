/*
 * Copyright 2020 Joyent, Inc.
 */

//! Outstanding requests of a connection.
//!
//! Every request issued on a connection is registered here under a fresh
//! request id until its response arrives. The table is also the
//! connection's timeout listener: registered with the
//! [`TimeoutChecker`](../../timeout_checker/struct.TimeoutChecker.html), it
//! fails requests that outlive the connection's timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slog::{debug, o, warn, Drain, Logger};

use crate::connection::state::ConnectionState;
use crate::error::{Error, Result};
use crate::message::{OperationKind, Request, Response};
use crate::promise::Promise;
use crate::timeout_checker::{now_millis, TimeoutEventListener};

struct PendingRequest {
    promise: Promise<Response>,
    kind: OperationKind,
    timestamp: u64,
}

pub struct PendingRequests {
    timeout_ms: u64,
    next_request_id: AtomicI32,
    requests: Mutex<HashMap<i32, PendingRequest>>,
    state: Arc<ConnectionState>,
    log: Logger,
}

impl PendingRequests {
    /// A `timeout_ms` of `0` disables request timeouts.
    pub fn new(timeout_ms: u64, state: Arc<ConnectionState>, log: Option<Logger>) -> Self {
        let log = log.unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        PendingRequests {
            timeout_ms,
            next_request_id: AtomicI32::new(1),
            requests: Mutex::new(HashMap::new()),
            state,
            log,
        }
    }

    fn lock(&self) -> MutexGuard<HashMap<i32, PendingRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> Error {
        self.state
            .connection_error()
            .unwrap_or_else(|| Error::server_down("The connection has been closed"))
    }

    /// Register `request` and return the promise its response will
    /// complete. Cancelling the promise drops the request from the table.
    pub fn register(self: &Arc<Self>, request: &Request) -> Promise<Response> {
        if !self.state.is_valid() {
            return Promise::failed(self.closed_error());
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let promise = Promise::with_request_id(request_id);
        self.lock().insert(
            request_id,
            PendingRequest {
                promise: promise.clone(),
                kind: request.kind(),
                timestamp: now_millis(),
            },
        );

        // The connection may have ended while the request was being added.
        if !self.state.is_valid() {
            if let Some(pending) = self.remove(request_id) {
                pending.fail(self.closed_error());
            }
            return promise;
        }

        let requests = Arc::downgrade(self);
        promise.on_cancel(move || {
            if let Some(requests) = requests.upgrade() {
                requests.remove(request_id);
            }
        });
        promise
    }

    /// Complete the request with its response. Returns `false` if the
    /// request is not outstanding, e.g. because it already timed out.
    pub fn complete(&self, request_id: i32, response: Response) -> bool {
        match self.remove(request_id) {
            Some(promise) => promise.complete(response),
            None => false,
        }
    }

    pub fn fail(&self, request_id: i32, error: Error) -> bool {
        match self.remove(request_id) {
            Some(promise) => promise.fail(error),
            None => false,
        }
    }

    pub fn remove(&self, request_id: i32) -> Option<Promise<Response>> {
        self.lock().remove(&request_id).map(|p| p.promise)
    }

    /// Cancel an outstanding request. Binds cannot be abandoned. Returns
    /// `false` if no such request is outstanding.
    pub fn abandon(&self, request_id: i32) -> Result<bool> {
        let promise = {
            let mut requests = self.lock();
            match requests.get(&request_id) {
                None => return Ok(false),
                Some(p) if p.kind == OperationKind::Bind => {
                    return Err(Error::not_supported("Bind requests cannot be abandoned"));
                }
                Some(_) => requests.remove(&request_id).map(|p| p.promise),
            }
        };
        Ok(promise.map(|p| p.cancel()).unwrap_or(false))
    }

    /// Fail every outstanding request with `error`.
    pub fn fail_all(&self, error: &Error) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            pending.promise.fail(error.clone());
        }
        count
    }

    /// Mark the connection as failed with `error`. The connection's event
    /// listeners are notified first, then every outstanding request fails.
    pub fn fail_connection(&self, is_disconnect_notification: bool, error: &Error) -> bool {
        if !self.state.notify_connection_error(is_disconnect_notification, error) {
            return false;
        }
        warn!(self.log, "connection failed: {}", error);
        self.fail_all(error);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }
}

impl TimeoutEventListener for PendingRequests {
    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn handle_timeout(&self, current_time: u64) -> u64 {
        if self.timeout_ms == 0 || self.state.is_closed() {
            return 0;
        }

        let mut delay = self.timeout_ms;
        let expired: Vec<(i32, PendingRequest)> = {
            let mut requests = self.lock();
            let expired_ids: Vec<i32> = requests
                .iter()
                .filter_map(|(id, pending)| {
                    let deadline = pending.timestamp + self.timeout_ms;
                    if deadline > current_time {
                        delay = delay.min(deadline - current_time);
                        None
                    } else {
                        Some(*id)
                    }
                })
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| requests.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let mut bind_timed_out = false;
        for (request_id, pending) in expired {
            debug!(
                self.log,
                "{} request {} timed out after {} ms", pending.kind, request_id, self.timeout_ms
            );
            pending.promise.fail(Error::timed_out(self.timeout_ms));
            if pending.kind == OperationKind::Bind {
                bind_timed_out = true;
            }
        }

        // A bind in an unknown state leaves the connection unusable.
        if bind_timed_out {
            self.fail_connection(false, &Error::timed_out(self.timeout_ms));
            return 0;
        }
        delay
    }
}
