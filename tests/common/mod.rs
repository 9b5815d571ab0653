#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slog::{o, Drain, Logger};

use ldap_connection_core::connection::pending::PendingRequests;
use ldap_connection_core::connection::state::ConnectionState;
use ldap_connection_core::connection::{
    Connection, ConnectionEventListener, ResponseHandlers, SharedConnection,
};
use ldap_connection_core::error::Error;
use ldap_connection_core::factory::ConnectionFactory;
use ldap_connection_core::message::{
    BindResult, CompareResult, ExtendedRequest, ExtendedResult, IntermediateResponse, LdapResult,
    Request, Response, SearchResultEntry,
};
use ldap_connection_core::promise::Promise;
use ldap_connection_core::error::ResultCode;
use ldap_connection_core::timeout_checker::{TimeoutChecker, TimeoutEventListener};

/// The OID of the extended request the mocks answer with their name.
pub const WHO_AM_I: &str = "1.3.6.1.4.1.4203.1.11.3";

pub fn test_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

/// Decides the response to a request. `None` leaves the request
/// outstanding.
pub type Responder = Arc<dyn Fn(&Request) -> Option<Result<Response, Error>> + Send + Sync>;

pub fn answer_everything(name: &str) -> Responder {
    let name = name.to_string();
    Arc::new(move |request: &Request| {
        let response = match request {
            Request::Bind(_) => Response::Bind(BindResult::success()),
            Request::Compare(_) => Response::Compare(CompareResult {
                result: LdapResult::new(ResultCode::CompareTrue),
            }),
            Request::Extended(_) => Response::Extended(ExtendedResult {
                value: Some(name.clone().into_bytes()),
                ..ExtendedResult::success()
            }),
            _ => Response::Result(LdapResult::success()),
        };
        Some(Ok(response))
    })
}

pub fn reject_binds(name: &str) -> Responder {
    let others = answer_everything(name);
    Arc::new(move |request: &Request| match request {
        Request::Bind(_) => Some(Ok(Response::Bind(BindResult {
            result: LdapResult::new(ResultCode::InvalidCredentials)
                .with_diagnostic_message("bad password"),
            server_sasl_credentials: None,
        }))),
        other => others(other),
    })
}

/// Leaves binds outstanding and answers everything else.
pub fn defer_binds(name: &str) -> Responder {
    let others = answer_everything(name);
    Arc::new(move |request: &Request| match request {
        Request::Bind(_) => None,
        other => others(other),
    })
}

pub fn never_answer() -> Responder {
    Arc::new(|_: &Request| None)
}

pub struct MockConnection {
    name: String,
    state: Arc<ConnectionState>,
    pending: Arc<PendingRequests>,
    responder: Responder,
    checker: Option<Arc<TimeoutChecker>>,
}

impl MockConnection {
    pub fn new(
        name: &str,
        responder: Responder,
        timeout_ms: u64,
        checker: Option<Arc<TimeoutChecker>>,
    ) -> Arc<Self> {
        let state = Arc::new(ConnectionState::new());
        let pending = Arc::new(PendingRequests::new(timeout_ms, state.clone(), None));
        if let Some(checker) = &checker {
            checker.add_listener(pending.clone());
        }
        Arc::new(MockConnection {
            name: name.to_string(),
            state,
            pending,
            responder,
            checker,
        })
    }

    pub fn answering(name: &str) -> Arc<Self> {
        Self::new(name, answer_everything(name), 0, None)
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Simulate a fatal transport error.
    pub fn fail(&self, error: Error) {
        self.pending.fail_connection(false, &error);
    }
}

impl Connection for MockConnection {
    fn execute_async(&self, request: Request, handlers: ResponseHandlers) -> Promise<Response> {
        if let Request::Abandon(abandon) = &request {
            return Promise::from_result(
                self.pending
                    .abandon(abandon.request_id)
                    .map(|_| Response::Result(LdapResult::success())),
            );
        }

        let promise = self.pending.register(&request);
        if promise.is_done() {
            return promise;
        }

        match (&request, &handlers) {
            (Request::Extended(_), ResponseHandlers { intermediate: Some(h), .. }) => {
                h.handle_intermediate_response(&IntermediateResponse {
                    oid: Some(String::from("1.2.3")),
                    value: None,
                });
            }
            (Request::Search(_), ResponseHandlers { search: Some(h), .. }) => {
                h.handle_entry(&SearchResultEntry {
                    dn: format!("cn=entry,o={}", self.name),
                    attributes: Vec::new(),
                });
            }
            _ => (),
        }

        match (self.responder)(&request) {
            Some(Ok(response)) => {
                self.pending.complete(promise.request_id(), response);
            }
            Some(Err(e)) => {
                self.pending.fail(promise.request_id(), e);
            }
            None => (),
        }
        promise
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.state.add_listener(listener)
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.state.remove_listener(listener)
    }

    fn close(&self) {
        if self.state.notify_connection_closed() {
            self.pending
                .fail_all(&Error::server_down("The connection has been closed"));
            if let Some(checker) = &self.checker {
                let listener: Arc<dyn TimeoutEventListener> = self.pending.clone();
                checker.remove_listener(&listener);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }
}

pub struct MockFactory {
    name: String,
    responder: Responder,
    failing: AtomicBool,
    holding: AtomicBool,
    held: Mutex<Vec<Promise<SharedConnection>>>,
    closed: AtomicBool,
    attempts: AtomicUsize,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_responder(name, answer_everything(name))
    }

    pub fn with_responder(name: &str, responder: Responder) -> Arc<Self> {
        Arc::new(MockFactory {
            name: name.to_string(),
            responder,
            failing: AtomicBool::new(false),
            holding: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// While holding, connection attempts stay in flight until released.
    pub fn set_holding(&self, holding: bool) {
        self.holding.store(holding, Ordering::SeqCst);
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Complete every held attempt with a new connection.
    pub fn release_held(&self) {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for promise in held {
            promise.complete(self.open());
        }
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    fn open(&self) -> SharedConnection {
        let connection = MockConnection::new(&self.name, self.responder.clone(), 0, None);
        self.connections.lock().unwrap().push(connection.clone());
        connection
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Promise::failed(Error::connect_error(format!("{} is unreachable", self.name)));
        }
        if self.holding.load(Ordering::SeqCst) {
            let promise = Promise::new();
            self.held.lock().unwrap().push(promise.clone());
            return promise;
        }
        Promise::completed(self.open())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// The name of the mock server behind `connection`.
pub fn served_by(connection: &SharedConnection) -> String {
    let result = connection
        .extended(ExtendedRequest::new(WHO_AM_I), None)
        .unwrap();
    String::from_utf8(result.value.unwrap()).unwrap()
}

pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn boxed(factories: &[&Arc<MockFactory>]) -> Vec<Box<dyn ConnectionFactory>> {
    factories
        .iter()
        .map(|f| Box::new(Arc::clone(f)) as Box<dyn ConnectionFactory>)
        .collect()
}
