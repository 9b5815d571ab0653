/*
 * Copyright 2020 Joyent, Inc.
 */

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::ConnectionEventListener;
use crate::error::Error;
use crate::message::ExtendedResult;
use crate::shared::ListenerSet;

#[derive(Clone, Debug)]
enum Status {
    Valid,
    Closed,
    Failed {
        is_disconnect_notification: bool,
        error: Error,
    },
}

/// The lifecycle of a connection and the listeners interested in it.
///
/// A connection starts out valid and ends either closed or failed. The
/// first transition wins: later ones are ignored and listeners hear about
/// the end of the connection exactly once. A listener registered after the
/// end is notified immediately.
pub struct ConnectionState {
    status: Mutex<Status>,
    listeners: ListenerSet<dyn ConnectionEventListener>,
}

impl ConnectionState {
    pub fn new() -> Self {
        ConnectionState {
            status: Mutex::new(Status::Valid),
            listeners: ListenerSet::new(),
        }
    }

    fn lock(&self) -> MutexGuard<Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        let status = {
            let status = self.lock();
            if let Status::Valid = *status {
                self.listeners.insert(listener);
                return;
            }
            status.clone()
        };
        notify(&listener, &status);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.listeners.remove(listener);
    }

    pub fn is_valid(&self) -> bool {
        matches!(*self.lock(), Status::Valid)
    }

    /// Whether the connection has ended, by closing or by failing.
    pub fn is_closed(&self) -> bool {
        !self.is_valid()
    }

    /// The error that ended the connection, if it failed.
    pub fn connection_error(&self) -> Option<Error> {
        match &*self.lock() {
            Status::Failed { error, .. } => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns `false` if the connection had already ended.
    pub fn notify_connection_closed(&self) -> bool {
        self.transition(Status::Closed)
    }

    /// Returns `false` if the connection had already ended.
    pub fn notify_connection_error(&self, is_disconnect_notification: bool, error: &Error) -> bool {
        self.transition(Status::Failed {
            is_disconnect_notification,
            error: error.clone(),
        })
    }

    /// Unsolicited notifications are only delivered while the connection
    /// is valid. Returns whether the notification was delivered.
    pub fn notify_unsolicited_notification(&self, notification: &ExtendedResult) -> bool {
        if !self.is_valid() {
            return false;
        }
        for listener in self.listeners.snapshot().iter() {
            listener.handle_unsolicited_notification(notification);
        }
        true
    }

    fn transition(&self, next: Status) -> bool {
        {
            let mut status = self.lock();
            if !matches!(*status, Status::Valid) {
                return false;
            }
            *status = next.clone();
        }
        for listener in self.listeners.snapshot().iter() {
            notify(listener, &next);
        }
        true
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(listener: &Arc<dyn ConnectionEventListener>, status: &Status) {
    match status {
        Status::Valid => (),
        Status::Closed => listener.handle_connection_closed(),
        Status::Failed {
            is_disconnect_notification,
            error,
        } => listener.handle_connection_error(*is_disconnect_notification, error),
    }
}
