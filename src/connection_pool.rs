/*
 * Copyright 2020 Joyent, Inc.
 */

//! A fixed-size pool of connections obtained from another factory.
//!
//! The pool opens connections on demand, up to its maximum, and keeps
//! them for reuse. Closing a connection handed out by the pool (or dropping
//! the last reference to it) returns the underlying connection to the pool
//! instead of closing it. A returned connection that is no longer valid is
//! closed and its slot freed for a replacement.
//!
//! A blocking claim waits on the pool for at most the configured claim
//! timeout. An asynchronous claim made while the pool is exhausted is queued
//! and served, in order, as connections come back. A queued claim may be
//! cancelled; it does not time out on its own.

pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slog::{debug, info, o, Drain, Logger};

use crate::connection::{Connection, ConnectionEventListener, ResponseHandlers, SharedConnection};
use crate::connection_pool::types::{
    ConnectionData, ConnectionPoolOptions, ConnectionPoolState, ConnectionPoolStats, ProtectedData,
};
use crate::error::{Error, Result, ResultCode};
use crate::factory::ConnectionFactory;
use crate::message::{Request, Response};
use crate::promise::Promise;
use crate::shared::ListenerSet;

pub const DEFAULT_MAXIMUM: u32 = 10;

enum Claim {
    Idle(SharedConnection),
    Create,
}

struct PoolShared {
    factory: Box<dyn ConnectionFactory>,
    protected_data: ProtectedData,
    maximum: usize,
    claim_timeout: Option<u64>,
    log: Logger,
}

/// A connection factory that reuses the connections of its parent.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new<F>(factory: F, options: ConnectionPoolOptions) -> Self
    where
        F: ConnectionFactory + 'static,
    {
        let maximum = options.maximum.unwrap_or(DEFAULT_MAXIMUM).max(1) as usize;
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        let log = log.new(o!("pool" => factory.name()));

        info!(log, "connection pool created"; "maximum" => maximum);

        ConnectionPool {
            shared: Arc::new(PoolShared {
                factory: Box::new(factory),
                protected_data: ProtectedData::new(ConnectionData::new(maximum)),
                maximum,
                claim_timeout: options.claim_timeout,
                log,
            }),
        }
    }

    pub fn get_stats(&self) -> ConnectionPoolStats {
        self.shared.protected_data.connection_data_lock().stats()
    }

    pub fn get_state(&self) -> ConnectionPoolState {
        self.shared.protected_data.connection_data_lock().state
    }
}

impl ConnectionFactory for ConnectionPool {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        self.shared.claim_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        self.shared.claim()
    }

    fn close(&self) {
        self.shared.stop()
    }

    fn name(&self) -> String {
        format!("ConnectionPool({})", self.shared.factory.name())
    }
}

fn closed_error() -> Error {
    Error::server_down("The connection pool has been closed")
}

// Drop cancelled claims from the front of the queue.
fn next_waiter(data: &mut ConnectionData) -> Option<Promise<SharedConnection>> {
    while let Some(waiter) = data.waiters.pop_front() {
        if !waiter.is_done() {
            return Some(waiter);
        }
    }
    None
}

impl PoolShared {
    // Take an idle connection or reserve a slot for a new one. Idle
    // connections that failed while in the pool are handed back for closing.
    fn try_claim(
        &self,
        data: &mut ConnectionData,
        discarded: &mut Vec<SharedConnection>,
    ) -> Option<Claim> {
        while let Some(connection) = data.idle.pop_front() {
            if connection.is_valid() {
                return Some(Claim::Idle(connection));
            }
            data.total -= 1;
            discarded.push(connection);
        }
        if data.total < self.maximum {
            data.total += 1;
            return Some(Claim::Create);
        }
        None
    }

    fn close_discarded(&self, discarded: Vec<SharedConnection>) {
        for connection in discarded {
            debug!(self.log, "closing failed idle connection");
            connection.close();
        }
    }

    fn claim(self: &Arc<Self>) -> Result<SharedConnection> {
        let mut discarded = Vec::new();
        let deadline = self
            .claim_timeout
            .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));

        let claim = {
            let mut guard = self.protected_data.connection_data_lock();
            let mut timed_out = false;
            loop {
                if guard.state == ConnectionPoolState::Stopped {
                    break Err(closed_error());
                }
                if let Some(claim) = self.try_claim(&mut guard, &mut discarded) {
                    break Ok(claim);
                }
                if timed_out {
                    break Err(Error::new(
                        ResultCode::ClientSideTimeout,
                        "Unable to retrieve a connection within the claim timeout",
                    ));
                }
                let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                let (g, t) = self.protected_data.condvar_wait(guard, remaining);
                guard = g;
                timed_out = t;
            }
        };
        self.close_discarded(discarded);

        match claim? {
            Claim::Idle(connection) => Ok(self.wrap(connection)),
            Claim::Create => match self.factory.get_connection() {
                Ok(connection) => {
                    debug!(self.log, "opened pooled connection");
                    Ok(self.wrap(connection))
                }
                Err(e) => {
                    self.release_slot();
                    Err(e)
                }
            },
        }
    }

    fn claim_async(self: &Arc<Self>) -> Promise<SharedConnection> {
        let mut discarded = Vec::new();
        let claim = {
            let mut data = self.protected_data.connection_data_lock();
            if data.state == ConnectionPoolState::Stopped {
                return Promise::failed(closed_error());
            }
            match self.try_claim(&mut data, &mut discarded) {
                Some(claim) => claim,
                None => {
                    let waiter = Promise::new();
                    data.waiters.push_back(waiter.clone());
                    debug!(self.log, "pool exhausted, queueing claim";
                        "queued" => data.waiters.len());
                    return waiter;
                }
            }
        };
        self.close_discarded(discarded);

        match claim {
            Claim::Idle(connection) => Promise::completed(self.wrap(connection)),
            Claim::Create => {
                let promise = Promise::new();
                self.create_for(promise.clone());
                promise
            }
        }
    }

    // Open a connection in a reserved slot and hand it to `waiter`.
    fn create_for(self: &Arc<Self>, waiter: Promise<SharedConnection>) {
        let pool = Arc::clone(self);
        self.factory
            .get_connection_async()
            .on_complete(move |result| match result {
                Ok(connection) => {
                    debug!(pool.log, "opened pooled connection");
                    // A claim cancelled meanwhile drops the connection, which
                    // returns it to the pool.
                    waiter.complete(pool.wrap(Arc::clone(connection)));
                }
                Err(e) => {
                    waiter.fail(e.clone());
                    pool.release_slot();
                }
            });
    }

    fn wrap(self: &Arc<Self>, connection: SharedConnection) -> SharedConnection {
        Arc::new(PooledConnection {
            connection,
            pool: Arc::clone(self),
            released: AtomicBool::new(false),
            listeners: ListenerSet::new(),
        })
    }

    // Give up a slot, passing it to the next queued claim if there is one.
    fn release_slot(self: &Arc<Self>) {
        let waiter = {
            let mut data = self.protected_data.connection_data_lock();
            data.total = data.total.saturating_sub(1);
            if data.state == ConnectionPoolState::Running {
                let waiter = next_waiter(&mut data);
                if waiter.is_some() {
                    data.total += 1;
                }
                waiter
            } else {
                None
            }
        };
        match waiter {
            Some(waiter) => self.create_for(waiter),
            None => self.protected_data.condvar_notify(),
        }
    }

    fn release(self: &Arc<Self>, connection: SharedConnection) {
        let waiter = {
            let mut data = self.protected_data.connection_data_lock();
            if data.state == ConnectionPoolState::Running && connection.is_valid() {
                match next_waiter(&mut data) {
                    Some(waiter) => Some(waiter),
                    None => {
                        data.idle.push_back(connection);
                        self.protected_data.condvar_notify();
                        return;
                    }
                }
            } else {
                None
            }
        };

        match waiter {
            Some(waiter) => {
                waiter.complete(self.wrap(connection));
            }
            None => {
                debug!(self.log, "closing returned connection");
                connection.close();
                self.release_slot();
            }
        }
    }

    fn stop(&self) {
        let (idle, waiters) = {
            let mut data = self.protected_data.connection_data_lock();
            if data.state == ConnectionPoolState::Stopped {
                return;
            }
            data.state = ConnectionPoolState::Stopped;
            let idle: Vec<SharedConnection> = data.idle.drain(..).collect();
            data.total -= idle.len();
            let waiters: Vec<Promise<SharedConnection>> = data.waiters.drain(..).collect();
            (idle, waiters)
        };
        self.protected_data.condvar_notify_all();

        info!(self.log, "closing connection pool";
            "idle" => idle.len(), "queued" => waiters.len());
        for connection in idle {
            connection.close();
        }
        for waiter in waiters {
            waiter.fail(closed_error());
        }
        self.factory.close();
    }
}

/// A connection claimed from a [`ConnectionPool`]. Closing it returns the
/// underlying connection to the pool; so does dropping it.
pub struct PooledConnection {
    connection: SharedConnection,
    pool: Arc<PoolShared>,
    released: AtomicBool,
    listeners: ListenerSet<dyn ConnectionEventListener>,
}

impl PooledConnection {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // The next claimer must not see this claimer's listeners.
        let listeners = self.listeners.snapshot();
        for listener in listeners.iter() {
            self.connection.remove_connection_event_listener(listener);
        }
        self.pool.release(Arc::clone(&self.connection));
        for listener in listeners.iter() {
            listener.handle_connection_closed();
        }
    }
}

impl Connection for PooledConnection {
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response> {
        if self.is_released() {
            return Promise::failed(Error::server_down(
                "The connection has been returned to its pool",
            ));
        }
        self.connection.execute_async(request, handlers)
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        if self.is_released() {
            listener.handle_connection_closed();
            return;
        }
        if self.listeners.insert(Arc::clone(&listener)) {
            self.connection.add_connection_event_listener(listener);
        }
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        if self.listeners.remove(listener) {
            self.connection.remove_connection_event_listener(listener);
        }
    }

    fn close(&self) {
        self.release()
    }

    fn is_closed(&self) -> bool {
        self.is_released() || self.connection.is_closed()
    }

    fn is_valid(&self) -> bool {
        !self.is_released() && self.connection.is_valid()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release()
    }
}
