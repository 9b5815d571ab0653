//
// Copyright 2020 Joyent, Inc.
//

//! Connection management for LDAP clients
//!
//! This crate provides the client-side plumbing that sits between an
//! application and the transport that talks to directory servers:
//!
//! * [`Promise`]: promise/struct.Promise.html, a single-assignment result with
//!   continuations, returned by every asynchronous operation. Blocking
//!   operations wait on the same promise.
//! * [`Connection`]: connection/trait.Connection.html and
//!   [`ConnectionFactory`]: factory/trait.ConnectionFactory.html, the
//!   interfaces that transports implement.
//! * Factory decorators such as the
//!   [`AuthenticatedConnectionFactory`]:
//!   factory/authenticated/struct.AuthenticatedConnectionFactory.html,
//!   which binds every connection before handing it out, and the
//!   [`ConnectionPool`]: connection_pool/struct.ConnectionPool.html, which
//!   keeps a fixed number of connections for reuse.
//! * The [`LoadBalancer`]: load_balancer/struct.LoadBalancer.html, which
//!   spreads requests over several factories in round-robin or failover
//!   order, takes failing factories offline and probes them until they
//!   recover.
//! * The [`TimeoutChecker`]: timeout_checker/struct.TimeoutChecker.html,
//!   one background thread that enforces request deadlines for every
//!   connection in the process.
//!
//! # Example
//!
//! Spread connections over two servers, authenticating each one.
//!
//! ```rust,ignore
//! use std::sync::Mutex;
//!
//! use slog::{Drain, Logger, o};
//!
//! use ldap_connection_core::factory::ConnectionFactory;
//! use ldap_connection_core::factory::authenticated::AuthenticatedConnectionFactory;
//! use ldap_connection_core::load_balancer::LoadBalancer;
//! use ldap_connection_core::load_balancer::types::LoadBalancerOptions;
//! use ldap_connection_core::message::BindRequest;
//!
//! fn main() {
//!     let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//!     let log = Logger::root(
//!         Mutex::new(
//!             slog_term::FullFormat::new(plain).build()
//!         ).fuse(),
//!         o!("build-id" => "0.1.0")
//!     );
//!
//!     let options = LoadBalancerOptions {
//!         monitoring_interval: Some(5000),
//!         log: Some(log),
//!         ..Default::default()
//!     };
//!
//!     let balancer = LoadBalancer::round_robin(
//!         vec![Box::new(TcpFactory::new("ldap1:389")),
//!              Box::new(TcpFactory::new("ldap2:389"))],
//!         options
//!     );
//!     let factory = AuthenticatedConnectionFactory::new(
//!         balancer,
//!         BindRequest::simple("cn=admin", "secret")
//!     );
//!
//!     let connection = factory.get_connection()?;
//!     // Do stuff here
//!     connection.close();
//! }
//! ```

#![allow(missing_docs)]

pub mod connection;
pub mod connection_pool;
pub mod error;
pub mod factory;
pub mod load_balancer;
pub mod message;
pub mod promise;
pub mod scheduler;
pub mod shared;
pub mod timeout_checker;

pub use crate::promise::Promise;
