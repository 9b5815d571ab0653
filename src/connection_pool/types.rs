/*
 * Copyright 2020 Joyent, Inc.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use derive_more::Display;
use slog::Logger;

use crate::connection::SharedConnection;
use crate::promise::Promise;

#[derive(Clone, Default)]
pub struct ConnectionPoolOptions {
    /// The most connections open at once, idle or claimed.
    pub maximum: Option<u32>,
    /// Milliseconds a blocking claim waits for a connection. `None` waits
    /// indefinitely.
    pub claim_timeout: Option<u64>,
    pub log: Option<Logger>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionPoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    /// Asynchronous claims queued for a connection.
    pub pending_claims: usize,
}

#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub enum ConnectionPoolState {
    #[display(fmt = "running")]
    Running,
    #[display(fmt = "stopped")]
    Stopped,
}

pub(crate) struct ConnectionData {
    pub idle: VecDeque<SharedConnection>,
    pub waiters: VecDeque<Promise<SharedConnection>>,
    // Idle, claimed and in-progress connections.
    pub total: usize,
    pub state: ConnectionPoolState,
}

impl ConnectionData {
    pub fn new(maximum: usize) -> Self {
        ConnectionData {
            idle: VecDeque::with_capacity(maximum),
            waiters: VecDeque::new(),
            total: 0,
            state: ConnectionPoolState::Running,
        }
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        ConnectionPoolStats {
            total_connections: self.total,
            idle_connections: self.idle.len(),
            pending_claims: self.waiters.len(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProtectedData(Arc<(Mutex<ConnectionData>, Condvar)>);

impl ProtectedData {
    pub fn new(connection_data: ConnectionData) -> Self {
        ProtectedData(Arc::new((Mutex::new(connection_data), Condvar::new())))
    }

    pub fn connection_data_lock(&self) -> MutexGuard<ConnectionData> {
        (self.0).0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the guard and whether the wait timed out.
    pub fn condvar_wait<'a>(
        &self,
        g: MutexGuard<'a, ConnectionData>,
        m_timeout: Option<Duration>,
    ) -> (MutexGuard<'a, ConnectionData>, bool) {
        match m_timeout {
            Some(timeout) => {
                let (g, wait_result) = (self.0)
                    .1
                    .wait_timeout(g, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
                (g, wait_result.timed_out())
            }
            None => ((self.0).1.wait(g).unwrap_or_else(PoisonError::into_inner), false),
        }
    }

    pub fn condvar_notify(&self) {
        (self.0).1.notify_one()
    }

    pub fn condvar_notify_all(&self) {
        (self.0).1.notify_all()
    }
}
