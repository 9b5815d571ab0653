/*
 * Copyright 2020 Joyent, Inc.
 */

//! Adapting blocking connections to the asynchronous interface.

use std::sync::Arc;

use crate::connection::{Connection, ConnectionEventListener, ResponseHandlers};
use crate::error::{Error, Result};
use crate::message::{
    AddRequest, BindRequest, BindResult, CompareRequest, CompareResult, DeleteRequest,
    ExtendedRequest, ExtendedResult, IntermediateResponseHandler, LdapResult, ModifyDnRequest,
    ModifyRequest, Request, Response, SearchRequest, SearchResultEntry, SearchResultHandler,
};
use crate::promise::Promise;

/// A connection whose operations block until they complete.
///
/// Only extended operations can receive intermediate responses, and
/// requests cannot be abandoned.
pub trait SynchronousConnection: Send + Sync {
    fn add(&self, request: AddRequest) -> Result<LdapResult>;

    fn bind(&self, request: BindRequest) -> Result<BindResult>;

    fn compare(&self, request: CompareRequest) -> Result<CompareResult>;

    fn delete(&self, request: DeleteRequest) -> Result<LdapResult>;

    fn modify(&self, request: ModifyRequest) -> Result<LdapResult>;

    fn modify_dn(&self, request: ModifyDnRequest) -> Result<LdapResult>;

    fn extended(
        &self,
        request: ExtendedRequest,
        handler: Option<&dyn IntermediateResponseHandler>,
    ) -> Result<ExtendedResult>;

    fn search(
        &self,
        request: SearchRequest,
        handler: &dyn SearchResultHandler,
    ) -> Result<LdapResult>;

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>);

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>);

    fn close(&self);

    fn is_closed(&self) -> bool;

    fn is_valid(&self) -> bool;
}

struct IgnoreEntries;

impl SearchResultHandler for IgnoreEntries {
    fn handle_entry(&self, _entry: &SearchResultEntry) -> bool {
        true
    }
}

/// Presents a [`SynchronousConnection`] as a [`Connection`].
///
/// Each asynchronous operation runs the blocking operation on the calling
/// thread and returns a promise that is already complete. A failure of the
/// blocking operation fails the promise with the same error.
pub struct SynchronousConnectionAdapter<S> {
    connection: S,
}

impl<S: SynchronousConnection> SynchronousConnectionAdapter<S> {
    pub fn new(connection: S) -> Self {
        SynchronousConnectionAdapter { connection }
    }

    pub fn get_ref(&self) -> &S {
        &self.connection
    }

    fn run(&self, request: Request, handlers: ResponseHandlers) -> Result<Response> {
        let kind = request.kind();
        if handlers.intermediate.is_some() && !matches!(request, Request::Extended(_)) {
            return Err(Error::not_supported(format!(
                "Intermediate responses are not supported for {} requests on a \
                 synchronous connection",
                kind
            )));
        }

        let c = &self.connection;
        match request {
            Request::Add(r) => c.add(r).map(Response::Result),
            Request::Bind(r) => c.bind(r).map(Response::Bind),
            Request::Compare(r) => c.compare(r).map(Response::Compare),
            Request::Delete(r) => c.delete(r).map(Response::Result),
            Request::Modify(r) => c.modify(r).map(Response::Result),
            Request::ModifyDn(r) => c.modify_dn(r).map(Response::Result),
            Request::Extended(r) => c
                .extended(r, handlers.intermediate.as_deref())
                .map(Response::Extended),
            Request::Search(r) => {
                let result = match handlers.search {
                    Some(handler) => c.search(r, handler.as_ref()),
                    None => c.search(r, &IgnoreEntries),
                };
                result.map(Response::Result)
            }
            Request::Abandon(_) => Err(Error::not_supported(
                "Abandon requests are not supported on a synchronous connection",
            )),
        }
    }
}

impl<S: SynchronousConnection> Connection for SynchronousConnectionAdapter<S> {
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response> {
        Promise::from_result(self.run(request, handlers))
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
