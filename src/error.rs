/*
 * Copyright 2020 Joyent, Inc.
 */

use std::fmt;

use thiserror::Error as ThisError;

use crate::message::LdapResult;

pub type Result<T> = std::result::Result<T, Error>;

/// LDAP result codes, including the client-side codes used for failures
/// that never reached (or never came back from) the server.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResultCode {
    Undefined,
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    AuthMethodNotSupported,
    StrongAuthRequired,
    Referral,
    AdminLimitExceeded,
    ConstraintViolation,
    AttributeOrValueExists,
    NoSuchObject,
    InvalidDnSyntax,
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    NamingViolation,
    ObjectClassViolation,
    NotAllowedOnNonLeaf,
    NotAllowedOnRdn,
    EntryAlreadyExists,
    ObjectClassModsProhibited,
    Other,
    ClientSideServerDown,
    ClientSideLocalError,
    ClientSideEncodingError,
    ClientSideDecodingError,
    ClientSideTimeout,
    ClientSideAuthUnknown,
    ClientSideFilterError,
    ClientSideUserCancelled,
    ClientSideParamError,
    ClientSideNoMemory,
    ClientSideConnectError,
    ClientSideNotSupported,
    ClientSideControlNotFound,
    ClientSideNoResultsReturned,
    ClientSideUnexpectedResultsReturned,
    ClientSideClientLoop,
    ClientSideReferralLimitExceeded,
    Canceled,
    NoSuchOperation,
    TooLate,
    CannotCancel,
}

const RESULT_CODES: &[(ResultCode, i32, &str)] = &[
    (ResultCode::Undefined, -1, "Undefined"),
    (ResultCode::Success, 0, "Success"),
    (ResultCode::OperationsError, 1, "Operations Error"),
    (ResultCode::ProtocolError, 2, "Protocol Error"),
    (ResultCode::TimeLimitExceeded, 3, "Time Limit Exceeded"),
    (ResultCode::SizeLimitExceeded, 4, "Size Limit Exceeded"),
    (ResultCode::CompareFalse, 5, "Compare False"),
    (ResultCode::CompareTrue, 6, "Compare True"),
    (ResultCode::AuthMethodNotSupported, 7, "Authentication Method Not Supported"),
    (ResultCode::StrongAuthRequired, 8, "Strong Authentication Required"),
    (ResultCode::Referral, 10, "Referral"),
    (ResultCode::AdminLimitExceeded, 11, "Administrative Limit Exceeded"),
    (ResultCode::ConstraintViolation, 19, "Constraint Violation"),
    (ResultCode::AttributeOrValueExists, 20, "Attribute Or Value Exists"),
    (ResultCode::NoSuchObject, 32, "No Such Entry"),
    (ResultCode::InvalidDnSyntax, 34, "Invalid DN Syntax"),
    (ResultCode::InappropriateAuthentication, 48, "Inappropriate Authentication"),
    (ResultCode::InvalidCredentials, 49, "Invalid Credentials"),
    (ResultCode::InsufficientAccessRights, 50, "Insufficient Access Rights"),
    (ResultCode::Busy, 51, "Busy"),
    (ResultCode::Unavailable, 52, "Unavailable"),
    (ResultCode::UnwillingToPerform, 53, "Unwilling To Perform"),
    (ResultCode::NamingViolation, 64, "Naming Violation"),
    (ResultCode::ObjectClassViolation, 65, "Object Class Violation"),
    (ResultCode::NotAllowedOnNonLeaf, 66, "Not Allowed On Non-Leaf"),
    (ResultCode::NotAllowedOnRdn, 67, "Not Allowed On RDN"),
    (ResultCode::EntryAlreadyExists, 68, "Entry Already Exists"),
    (ResultCode::ObjectClassModsProhibited, 69, "Object Class Modifications Prohibited"),
    (ResultCode::Other, 80, "Other"),
    (ResultCode::ClientSideServerDown, 81, "Server Connection Closed"),
    (ResultCode::ClientSideLocalError, 82, "Local Error"),
    (ResultCode::ClientSideEncodingError, 83, "Encoding Error"),
    (ResultCode::ClientSideDecodingError, 84, "Decoding Error"),
    (ResultCode::ClientSideTimeout, 85, "Client-Side Timeout"),
    (ResultCode::ClientSideAuthUnknown, 86, "Unknown Authentication Mechanism"),
    (ResultCode::ClientSideFilterError, 87, "Filter Error"),
    (ResultCode::ClientSideUserCancelled, 88, "Cancelled by User"),
    (ResultCode::ClientSideParamError, 89, "Parameter Error"),
    (ResultCode::ClientSideNoMemory, 90, "Out of Memory"),
    (ResultCode::ClientSideConnectError, 91, "Connect Error"),
    (ResultCode::ClientSideNotSupported, 92, "Operation Not Supported"),
    (ResultCode::ClientSideControlNotFound, 93, "Control Not Found"),
    (ResultCode::ClientSideNoResultsReturned, 94, "No Results Returned"),
    (ResultCode::ClientSideUnexpectedResultsReturned, 95, "Unexpected Results Returned"),
    (ResultCode::ClientSideClientLoop, 96, "Referral Loop Detected"),
    (ResultCode::ClientSideReferralLimitExceeded, 97, "Referral Hop Limit Exceeded"),
    (ResultCode::Canceled, 118, "Canceled"),
    (ResultCode::NoSuchOperation, 119, "No Such Operation"),
    (ResultCode::TooLate, 120, "Too Late"),
    (ResultCode::CannotCancel, 121, "Cannot Cancel"),
];

impl ResultCode {
    /// The integer value of this result code as it appears on the wire.
    pub fn value(self) -> i32 {
        RESULT_CODES
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, value, _)| *value)
            .unwrap_or(-1)
    }

    pub fn name(self) -> &'static str {
        RESULT_CODES
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("Undefined")
    }

    /// Whether this code denotes a successful outcome. The compare codes
    /// are successful: they carry the answer to the assertion.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResultCode::Success | ResultCode::CompareFalse | ResultCode::CompareTrue
        )
    }

    pub fn kind(self) -> ErrorKind {
        use ResultCode::*;
        match self {
            ProtocolError | ClientSideEncodingError | ClientSideDecodingError => {
                ErrorKind::Decode
            }
            AuthMethodNotSupported
            | StrongAuthRequired
            | InappropriateAuthentication
            | InvalidCredentials
            | ClientSideAuthUnknown => ErrorKind::Authentication,
            ConstraintViolation
            | AttributeOrValueExists
            | InvalidDnSyntax
            | NamingViolation
            | ObjectClassViolation
            | NotAllowedOnNonLeaf
            | NotAllowedOnRdn
            | EntryAlreadyExists
            | ObjectClassModsProhibited => ErrorKind::Constraint,
            Canceled | ClientSideUserCancelled => ErrorKind::Cancelled,
            TimeLimitExceeded | ClientSideTimeout => ErrorKind::TimedOut,
            Busy
            | Unavailable
            | UnwillingToPerform
            | ClientSideServerDown
            | ClientSideConnectError => ErrorKind::Connection,
            ClientSideNotSupported => ErrorKind::Unsupported,
            _ => ErrorKind::Other,
        }
    }
}

impl From<i32> for ResultCode {
    fn from(value: i32) -> Self {
        RESULT_CODES
            .iter()
            .find(|(_, v, _)| *v == value)
            .map(|(code, _, _)| *code)
            .unwrap_or(ResultCode::Undefined)
    }
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code.value()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} ({})", self.name(), self.value())
    }
}

/// The classes of failure a caller may want to react to differently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed data received or produced by the codec.
    Decode,
    /// The server rejected a bind.
    Authentication,
    /// The operation is semantically invalid on the server.
    Constraint,
    /// Abandoned by the user or the server.
    Cancelled,
    /// A deadline elapsed before the operation completed.
    TimedOut,
    /// Fatal: the connection is no longer usable.
    Connection,
    /// The operation is not available on this connection.
    Unsupported,
    Other,
}

/// A failed LDAP operation or connection attempt.
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{code}: {message}")]
pub struct Error {
    code: ResultCode,
    matched_dn: String,
    message: String,
}

impl Error {
    pub fn new<S: Into<String>>(code: ResultCode, message: S) -> Self {
        Error {
            code,
            matched_dn: String::new(),
            message: message.into(),
        }
    }

    /// Convert a non-successful result returned by a server.
    pub fn from_result(result: LdapResult) -> Self {
        Error {
            code: result.code,
            matched_dn: result.matched_dn,
            message: result.diagnostic_message,
        }
    }

    pub fn cancelled() -> Self {
        Error::new(
            ResultCode::ClientSideUserCancelled,
            "The request was cancelled by the user",
        )
    }

    pub fn timed_out(timeout_ms: u64) -> Self {
        Error::new(
            ResultCode::ClientSideTimeout,
            format!("The request did not complete within {} ms", timeout_ms),
        )
    }

    pub fn not_supported<S: Into<String>>(message: S) -> Self {
        Error::new(ResultCode::ClientSideNotSupported, message)
    }

    pub fn server_down<S: Into<String>>(message: S) -> Self {
        Error::new(ResultCode::ClientSideServerDown, message)
    }

    pub fn connect_error<S: Into<String>>(message: S) -> Self {
        Error::new(ResultCode::ClientSideConnectError, message)
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn matched_dn(&self) -> &str {
        &self.matched_dn
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
