/*
 * Copyright 2020 Joyent, Inc.
 */

use std::sync::Arc;

use crate::connection::{Connection, ConnectionEventListener, ResponseHandlers, SharedConnection};
use crate::error::Result;
use crate::factory::ConnectionFactory;
use crate::message::{Request, Response};
use crate::promise::Promise;

/// Gives a factory a name for log messages and load balancer events.
pub struct NamedConnectionFactory<F> {
    factory: F,
    name: String,
}

impl<F: ConnectionFactory> NamedConnectionFactory<F> {
    pub fn new<S: Into<String>>(factory: F, name: S) -> Self {
        NamedConnectionFactory {
            factory,
            name: name.into(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionFactory for NamedConnectionFactory<F> {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        self.factory.get_connection_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        self.factory.get_connection()
    }

    fn close(&self) {
        self.factory.close()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A view of a factory that ignores `close`, for handing a shared factory
/// to an owner that would otherwise close it.
pub struct UncloseableConnectionFactory<F> {
    factory: F,
}

impl<F: ConnectionFactory> UncloseableConnectionFactory<F> {
    pub fn new(factory: F) -> Self {
        UncloseableConnectionFactory { factory }
    }
}

impl<F: ConnectionFactory> ConnectionFactory for UncloseableConnectionFactory<F> {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        self.factory.get_connection_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        self.factory.get_connection()
    }

    fn close(&self) {}

    fn name(&self) -> String {
        self.factory.name()
    }
}

/// A view of a connection that ignores `close`.
pub struct UncloseableConnection {
    connection: SharedConnection,
}

impl UncloseableConnection {
    pub fn new(connection: SharedConnection) -> Self {
        UncloseableConnection { connection }
    }
}

impl Connection for UncloseableConnection {
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response> {
        self.connection.execute_async(request, handlers)
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.connection.add_connection_event_listener(listener)
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.connection.remove_connection_event_listener(listener)
    }

    fn close(&self) {}

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    fn is_valid(&self) -> bool {
        self.connection.is_valid()
    }
}
