/*
 * Copyright 2020 Joyent, Inc.
 */

//! Sources of connections.

pub mod authenticated;
pub mod wrapper;

use std::sync::Arc;

use crate::connection::SharedConnection;
use crate::error::Result;
use crate::promise::Promise;

/// Creates connections to a directory service.
///
/// Decorators own the factory they wrap: closing a decorator closes the
/// wrapped factory.
pub trait ConnectionFactory: Send + Sync {
    fn get_connection_async(&self) -> Promise<SharedConnection>;

    /// Block until a connection is available.
    fn get_connection(&self) -> Result<SharedConnection> {
        self.get_connection_async().get()
    }

    /// Release the factory's resources. Connections already handed out are
    /// not affected.
    fn close(&self);

    /// A name for the factory in log messages and load balancer events.
    fn name(&self) -> String {
        String::from("ConnectionFactory")
    }
}

impl<F: ConnectionFactory + ?Sized> ConnectionFactory for Box<F> {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        (**self).get_connection_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        (**self).get_connection()
    }

    fn close(&self) {
        (**self).close()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl<F: ConnectionFactory + ?Sized> ConnectionFactory for Arc<F> {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        (**self).get_connection_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        (**self).get_connection()
    }

    fn close(&self) {
        (**self).close()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
