/*
 * Copyright 2020 Joyent, Inc.
 */

//! Connections that are authenticated before they are handed out.

use std::sync::Arc;

use crate::connection::{Connection, ConnectionEventListener, ResponseHandlers, SharedConnection};
use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::message::{BindRequest, BindResult, Request, Response};
use crate::promise::Promise;

/// A factory that binds every connection obtained from its parent.
///
/// A connection is only handed out once its bind succeeds. If the bind
/// fails the connection is closed and the bind error is returned.
pub struct AuthenticatedConnectionFactory<F> {
    parent: F,
    bind_request: BindRequest,
}

impl<F: ConnectionFactory> AuthenticatedConnectionFactory<F> {
    pub fn new(parent: F, bind_request: BindRequest) -> Self {
        AuthenticatedConnectionFactory {
            parent,
            bind_request,
        }
    }

    pub fn bind_request(&self) -> &BindRequest {
        &self.bind_request
    }
}

impl<F: ConnectionFactory> ConnectionFactory for AuthenticatedConnectionFactory<F> {
    fn get_connection(&self) -> Result<SharedConnection> {
        let connection = self.parent.get_connection()?;
        match connection.bind(self.bind_request.clone()) {
            Ok(bind_result) => Ok(Arc::new(AuthenticatedConnection::new(connection, bind_result))),
            Err(e) => {
                connection.close();
                Err(e)
            }
        }
    }

    fn get_connection_async(&self) -> Promise<SharedConnection> {
        let promise = Promise::new();
        let target = promise.clone();
        let bind_request = self.bind_request.clone();

        self.parent.get_connection_async().on_complete(move |result| {
            let connection = match result {
                Ok(connection) => Arc::clone(connection),
                Err(e) => {
                    target.fail(e.clone());
                    return;
                }
            };
            let bound = connection.bind_async(bind_request, ResponseHandlers::default());
            bound.on_complete(move |bind_result| match bind_result {
                Ok(bind_result) => {
                    let authenticated: SharedConnection = Arc::new(AuthenticatedConnection::new(
                        Arc::clone(&connection),
                        bind_result.clone(),
                    ));
                    // Cancelled by the caller while the bind was in flight.
                    if !target.complete(authenticated) {
                        connection.close();
                    }
                }
                Err(e) => {
                    connection.close();
                    target.fail(e.clone());
                }
            });
        });

        promise
    }

    fn close(&self) {
        self.parent.close()
    }

    fn name(&self) -> String {
        format!("Authenticated({})", self.parent.name())
    }
}

/// A connection that has already been bound. Further binds are rejected so
/// the connection's identity cannot change.
pub struct AuthenticatedConnection {
    connection: SharedConnection,
    bind_result: BindResult,
}

impl AuthenticatedConnection {
    pub fn new(connection: SharedConnection, bind_result: BindResult) -> Self {
        AuthenticatedConnection {
            connection,
            bind_result,
        }
    }

    /// The result of the bind that authenticated this connection.
    pub fn authentication_result(&self) -> &BindResult {
        &self.bind_result
    }
}

impl Connection for AuthenticatedConnection {
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response> {
        if let Request::Bind(_) = request {
            return Promise::failed(Error::not_supported(
                "Bind requests are not allowed on pre-authenticated connections",
            ));
        }
        self.connection.execute_async(request, handlers)
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.connection.add_connection_event_listener(listener)
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.connection.remove_connection_event_listener(listener)
    }

    fn close(&self) {
        self.connection.close()
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    fn is_valid(&self) -> bool {
        self.connection.is_valid()
    }
}
