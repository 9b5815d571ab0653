/*
 * Copyright 2020 Joyent, Inc.
 */

//! Request and response values exchanged with a connection.
//!
//! These types are deliberately thin: the encoding of requests on the wire
//! and the directory data model belong to the codec layer. The connection
//! core only needs to route a request to a connection, correlate the
//! response and hand it back to the caller.

use std::convert::TryFrom;

use derive_more::Display;

use crate::error::{Error, ResultCode};

/// The operation a request performs.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum OperationKind {
    #[display(fmt = "add")]
    Add,
    #[display(fmt = "bind")]
    Bind,
    #[display(fmt = "compare")]
    Compare,
    #[display(fmt = "delete")]
    Delete,
    #[display(fmt = "modify")]
    Modify,
    #[display(fmt = "modify DN")]
    ModifyDn,
    #[display(fmt = "extended")]
    Extended,
    #[display(fmt = "search")]
    Search,
    #[display(fmt = "abandon")]
    Abandon,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn new<S: Into<String>>(name: S, values: Vec<String>) -> Self {
        Attribute {
            name: name.into(),
            values,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl AddRequest {
    pub fn new<S: Into<String>>(dn: S) -> Self {
        AddRequest {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BindRequest {
    Simple { name: String, password: Vec<u8> },
    Sasl { mechanism: String, credentials: Option<Vec<u8>> },
}

impl BindRequest {
    pub fn simple<S: Into<String>, P: Into<Vec<u8>>>(name: S, password: P) -> Self {
        BindRequest::Simple {
            name: name.into(),
            password: password.into(),
        }
    }

    pub fn sasl<S: Into<String>>(mechanism: S, credentials: Option<Vec<u8>>) -> Self {
        BindRequest::Sasl {
            mechanism: mechanism.into(),
            credentials,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub assertion_value: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeleteRequest {
    pub dn: String,
}

impl DeleteRequest {
    pub fn new<S: Into<String>>(dn: S) -> Self {
        DeleteRequest { dn: dn.into() }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
    Increment,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Modification {
    pub kind: ModificationType,
    pub attribute: Attribute,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<Modification>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

impl ExtendedRequest {
    pub fn new<S: Into<String>>(oid: S) -> Self {
        ExtendedRequest {
            oid: oid.into(),
            value: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new<S, F>(base_dn: S, scope: SearchScope, filter: F) -> Self
    where
        S: Into<String>,
        F: Into<String>,
    {
        SearchRequest {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }
}

/// Abandon the outstanding request with the given request id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AbandonRequest {
    pub request_id: i32,
}

impl AbandonRequest {
    pub fn new(request_id: i32) -> Self {
        AbandonRequest { request_id }
    }
}

/// Any request a connection can execute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Add(AddRequest),
    Bind(BindRequest),
    Compare(CompareRequest),
    Delete(DeleteRequest),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Extended(ExtendedRequest),
    Search(SearchRequest),
    Abandon(AbandonRequest),
}

impl Request {
    pub fn kind(&self) -> OperationKind {
        match self {
            Request::Add(_) => OperationKind::Add,
            Request::Bind(_) => OperationKind::Bind,
            Request::Compare(_) => OperationKind::Compare,
            Request::Delete(_) => OperationKind::Delete,
            Request::Modify(_) => OperationKind::Modify,
            Request::ModifyDn(_) => OperationKind::ModifyDn,
            Request::Extended(_) => OperationKind::Extended,
            Request::Search(_) => OperationKind::Search,
            Request::Abandon(_) => OperationKind::Abandon,
        }
    }
}

/// The final result of an operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
}

impl LdapResult {
    pub fn new(code: ResultCode) -> Self {
        LdapResult {
            code,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
        }
    }

    pub fn success() -> Self {
        LdapResult::new(ResultCode::Success)
    }

    pub fn with_diagnostic_message<S: Into<String>>(mut self, message: S) -> Self {
        self.diagnostic_message = message.into();
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindResult {
    pub result: LdapResult,
    pub server_sasl_credentials: Option<Vec<u8>>,
}

impl BindResult {
    pub fn success() -> Self {
        BindResult {
            result: LdapResult::success(),
            server_sasl_credentials: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompareResult {
    pub result: LdapResult,
}

impl CompareResult {
    /// Whether the assertion matched the entry.
    pub fn matched(&self) -> bool {
        self.result.code == ResultCode::CompareTrue
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendedResult {
    pub result: LdapResult,
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ExtendedResult {
    pub fn success() -> Self {
        ExtendedResult {
            result: LdapResult::success(),
            oid: None,
            value: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IntermediateResponse {
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchResultReference {
    pub uris: Vec<String>,
}

/// The final response to any request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Result(LdapResult),
    Bind(BindResult),
    Compare(CompareResult),
    Extended(ExtendedResult),
}

impl Response {
    pub fn result(&self) -> &LdapResult {
        match self {
            Response::Result(r) => r,
            Response::Bind(r) => &r.result,
            Response::Compare(r) => &r.result,
            Response::Extended(r) => &r.result,
        }
    }

    /// Fail with the carried result if it is not successful.
    pub fn into_checked(self) -> Result<Response, Error> {
        if self.result().code.is_success() {
            Ok(self)
        } else {
            Err(Error::from_result(self.result().clone()))
        }
    }
}

fn unexpected(expected: &str, response: &Response) -> Error {
    Error::new(
        ResultCode::ClientSideUnexpectedResultsReturned,
        format!("expected a {} response, received {:?}", expected, response),
    )
}

impl TryFrom<Response> for LdapResult {
    type Error = Error;

    fn try_from(response: Response) -> Result<Self, Error> {
        match response.into_checked()? {
            Response::Result(r) => Ok(r),
            other => Err(unexpected("plain", &other)),
        }
    }
}

impl TryFrom<Response> for BindResult {
    type Error = Error;

    fn try_from(response: Response) -> Result<Self, Error> {
        match response.into_checked()? {
            Response::Bind(r) => Ok(r),
            other => Err(unexpected("bind", &other)),
        }
    }
}

impl TryFrom<Response> for CompareResult {
    type Error = Error;

    fn try_from(response: Response) -> Result<Self, Error> {
        match response.into_checked()? {
            Response::Compare(r) => Ok(r),
            other => Err(unexpected("compare", &other)),
        }
    }
}

impl TryFrom<Response> for ExtendedResult {
    type Error = Error;

    fn try_from(response: Response) -> Result<Self, Error> {
        match response.into_checked()? {
            Response::Extended(r) => Ok(r),
            other => Err(unexpected("extended", &other)),
        }
    }
}

/// Receives intermediate responses sent by the server before the final
/// result of an operation.
pub trait IntermediateResponseHandler: Send + Sync {
    /// Return `false` to stop receiving further responses.
    fn handle_intermediate_response(&self, response: &IntermediateResponse) -> bool;
}

/// Receives search result entries and references as they arrive.
pub trait SearchResultHandler: Send + Sync {
    fn handle_entry(&self, entry: &SearchResultEntry) -> bool;

    fn handle_reference(&self, _reference: &SearchResultReference) -> bool {
        true
    }
}
