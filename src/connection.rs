/*
 * Copyright 2020 Joyent, Inc.
 */

//! The connection interface.
//!
//! A [`Connection`] implementation provides a single asynchronous entry
//! point, [`Connection::execute_async`], along with its lifecycle methods.
//! The typed operations and their blocking forms are provided on top of it:
//! a blocking call waits on the promise returned by the corresponding
//! asynchronous call, so both forms always agree on results and errors.

pub mod pending;
pub mod state;
pub mod synchronous;

use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::{
    AbandonRequest, AddRequest, BindRequest, BindResult, CompareRequest, CompareResult,
    DeleteRequest, ExtendedRequest, ExtendedResult, IntermediateResponseHandler, LdapResult,
    ModifyDnRequest, ModifyRequest, Request, Response, SearchRequest, SearchResultHandler,
};
use crate::promise::Promise;

/// A connection shared between its owner and the components that route
/// requests to it.
pub type SharedConnection = Arc<dyn Connection>;

/// Handlers for the responses an operation may produce before its final
/// result.
#[derive(Clone, Default)]
pub struct ResponseHandlers {
    pub intermediate: Option<Arc<dyn IntermediateResponseHandler>>,
    pub search: Option<Arc<dyn SearchResultHandler>>,
}

impl ResponseHandlers {
    pub fn intermediate(handler: Arc<dyn IntermediateResponseHandler>) -> Self {
        ResponseHandlers {
            intermediate: Some(handler),
            search: None,
        }
    }

    pub fn search(handler: Arc<dyn SearchResultHandler>) -> Self {
        ResponseHandlers {
            intermediate: None,
            search: Some(handler),
        }
    }
}

impl fmt::Debug for ResponseHandlers {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ResponseHandlers")
            .field("intermediate", &self.intermediate.is_some())
            .field("search", &self.search.is_some())
            .finish()
    }
}

/// Notified of connection lifecycle events.
///
/// A listener is notified at most once of the end of the connection: either
/// it was closed, or it failed with an error.
pub trait ConnectionEventListener: Send + Sync {
    fn handle_connection_closed(&self);

    /// `is_disconnect_notification` is set when the server announced the
    /// disconnect rather than the client detecting it.
    fn handle_connection_error(&self, is_disconnect_notification: bool, error: &Error);

    fn handle_unsolicited_notification(&self, notification: &ExtendedResult);
}

/// A connection to a directory server.
pub trait Connection: Send + Sync {
    /// Start executing `request`. The returned promise completes with the
    /// final response, or fails with the error that ended the operation.
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response>;

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>);

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>);

    /// Close the connection, failing any outstanding operations. Closing a
    /// closed connection has no effect.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Whether the connection is open and has not failed.
    fn is_valid(&self) -> bool;

    fn execute(&self, request: Request, handlers: ResponseHandlers) -> Result<Response> {
        self.execute_async(request, handlers).get()
    }

    fn add(&self, request: AddRequest) -> Result<LdapResult> {
        self.add_async(request, ResponseHandlers::default()).get()
    }

    fn add_async(&self, request: AddRequest, handlers: ResponseHandlers) -> Promise<LdapResult> {
        self.execute_async(Request::Add(request), handlers)
            .then(LdapResult::try_from)
    }

    fn bind(&self, request: BindRequest) -> Result<BindResult> {
        self.bind_async(request, ResponseHandlers::default()).get()
    }

    fn bind_async(&self, request: BindRequest, handlers: ResponseHandlers) -> Promise<BindResult> {
        self.execute_async(Request::Bind(request), handlers)
            .then(BindResult::try_from)
    }

    fn compare(&self, request: CompareRequest) -> Result<CompareResult> {
        self.compare_async(request, ResponseHandlers::default()).get()
    }

    fn compare_async(
        &self,
        request: CompareRequest,
        handlers: ResponseHandlers,
    ) -> Promise<CompareResult> {
        self.execute_async(Request::Compare(request), handlers)
            .then(CompareResult::try_from)
    }

    fn delete(&self, request: DeleteRequest) -> Result<LdapResult> {
        self.delete_async(request, ResponseHandlers::default()).get()
    }

    fn delete_async(
        &self,
        request: DeleteRequest,
        handlers: ResponseHandlers,
    ) -> Promise<LdapResult> {
        self.execute_async(Request::Delete(request), handlers)
            .then(LdapResult::try_from)
    }

    fn modify(&self, request: ModifyRequest) -> Result<LdapResult> {
        self.modify_async(request, ResponseHandlers::default()).get()
    }

    fn modify_async(
        &self,
        request: ModifyRequest,
        handlers: ResponseHandlers,
    ) -> Promise<LdapResult> {
        self.execute_async(Request::Modify(request), handlers)
            .then(LdapResult::try_from)
    }

    fn modify_dn(&self, request: ModifyDnRequest) -> Result<LdapResult> {
        self.modify_dn_async(request, ResponseHandlers::default()).get()
    }

    fn modify_dn_async(
        &self,
        request: ModifyDnRequest,
        handlers: ResponseHandlers,
    ) -> Promise<LdapResult> {
        self.execute_async(Request::ModifyDn(request), handlers)
            .then(LdapResult::try_from)
    }

    fn extended(
        &self,
        request: ExtendedRequest,
        handler: Option<Arc<dyn IntermediateResponseHandler>>,
    ) -> Result<ExtendedResult> {
        let handlers = ResponseHandlers {
            intermediate: handler,
            search: None,
        };
        self.extended_async(request, handlers).get()
    }

    fn extended_async(
        &self,
        request: ExtendedRequest,
        handlers: ResponseHandlers,
    ) -> Promise<ExtendedResult> {
        self.execute_async(Request::Extended(request), handlers)
            .then(ExtendedResult::try_from)
    }

    fn search(
        &self,
        request: SearchRequest,
        handler: Arc<dyn SearchResultHandler>,
    ) -> Result<LdapResult> {
        self.search_async(request, ResponseHandlers::search(handler))
            .get()
    }

    fn search_async(
        &self,
        request: SearchRequest,
        handlers: ResponseHandlers,
    ) -> Promise<LdapResult> {
        self.execute_async(Request::Search(request), handlers)
            .then(LdapResult::try_from)
    }

    /// Ask the connection to abandon an outstanding request. The abandoned
    /// request's promise fails with a cancellation error.
    fn abandon_async(&self, request: AbandonRequest) -> Promise<()> {
        self.execute_async(Request::Abandon(request), ResponseHandlers::default())
            .then(|_| Ok(()))
    }
}
