/*
 * Copyright 2020 Joyent, Inc.
 */

//! Spreading connection requests across several factories.
//!
//! A [`LoadBalancer`] is itself a [`ConnectionFactory`]. It holds a fixed,
//! ordered list of factories and tries them in an order chosen by its
//! [`LoadBalancingPolicy`]:
//!
//! * [`RoundRobin`] starts each request one factory after the previous one,
//!   spreading the load evenly.
//! * [`Failover`] always starts with the first factory, so later factories
//!   are used only while earlier ones are offline.
//!
//! A factory that fails to provide a connection is taken offline and
//! skipped until a background probe succeeds in obtaining a connection
//! from it again.

pub mod types;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slog::{debug, info, o, Drain, Logger};

use crate::connection::SharedConnection;
use crate::error::{Error, ErrorKind, Result};
use crate::factory::ConnectionFactory;
use crate::load_balancer::types::{
    FactoryState, LoadBalancerEventListener, LoadBalancerOptions, LogEvents, Monitor,
    MonitoredFactory,
};
use crate::promise::Promise;
use crate::scheduler::DEFAULT_SCHEDULER;

/// Milliseconds between probes of an offline factory.
pub const DEFAULT_MONITORING_INTERVAL: u64 = 1000;

/// Chooses where each connection request starts.
pub trait LoadBalancingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The index of the first factory to try, given `factory_count > 0`
    /// factories.
    fn initial_index(&self, factory_count: usize) -> usize;

    /// Called when a request that started at `initial` was served by
    /// `selected` because the factories in between were unavailable.
    fn selected(&self, _initial: usize, _selected: usize) {}
}

/// Always start with the first factory.
#[derive(Debug, Default)]
pub struct Failover;

impl LoadBalancingPolicy for Failover {
    fn name(&self) -> &'static str {
        "FailoverLoadBalancer"
    }

    fn initial_index(&self, _factory_count: usize) -> usize {
        0
    }
}

/// Start each request one factory after the previous one.
#[derive(Debug)]
pub struct RoundRobin {
    // The index most recently handed out; starts just before 0.
    next_index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            next_index: AtomicUsize::new(usize::MAX),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "RoundRobinLoadBalancer"
    }

    fn initial_index(&self, factory_count: usize) -> usize {
        if factory_count <= 1 {
            return 0;
        }
        let mut current = self.next_index.load(Ordering::Acquire);
        loop {
            let next = match current.wrapping_add(1) {
                n if n >= factory_count => 0,
                n => n,
            };
            match self.next_index.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    // Move the cursor past the factories that were skipped, so the next
    // request does not start at an offline factory. Losing the race to a
    // concurrent request is fine.
    fn selected(&self, initial: usize, selected: usize) {
        if initial != selected {
            let _ = self.next_index.compare_exchange(
                initial,
                selected,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

/// The factories of a load balancer and the policy that orders them.
pub struct LoadBalancingAlgorithm {
    policy: Box<dyn LoadBalancingPolicy>,
    factories: Vec<Arc<MonitoredFactory>>,
    monitor: Arc<Monitor>,
    log: Logger,
}

fn no_factory_available(last_error: Option<Error>) -> Error {
    last_error.unwrap_or_else(|| {
        Error::server_down("No operational connection factories are available")
    })
}

impl LoadBalancingAlgorithm {
    pub fn new<P>(
        policy: P,
        factories: Vec<Box<dyn ConnectionFactory>>,
        options: LoadBalancerOptions,
    ) -> Self
    where
        P: LoadBalancingPolicy + 'static,
    {
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        let log = log.new(o!("load_balancer" => policy.name()));

        let interval = options
            .monitoring_interval
            .unwrap_or(DEFAULT_MONITORING_INTERVAL);
        let listener = options.event_listener.unwrap_or_else(|| {
            Arc::new(LogEvents::new(log.clone())) as Arc<dyn LoadBalancerEventListener>
        });
        let scheduler = options
            .scheduler
            .unwrap_or_else(|| DEFAULT_SCHEDULER.acquire());

        let monitor = Arc::new(Monitor {
            interval: Duration::from_millis(interval),
            scheduler,
            listener,
            closed: AtomicBool::new(false),
        });

        let factories: Vec<Arc<MonitoredFactory>> = factories
            .into_iter()
            .enumerate()
            .map(|(index, factory)| {
                Arc::new(MonitoredFactory::new(index, factory, monitor.clone(), &log))
            })
            .collect();

        info!(log, "load balancer created with {} factories", factories.len());

        LoadBalancingAlgorithm {
            policy: Box::new(policy),
            factories,
            monitor,
            log,
        }
    }

    pub fn name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn factories(&self) -> &[Arc<MonitoredFactory>] {
        &self.factories
    }

    fn closed_error() -> Error {
        Error::server_down("The load balancer has been closed")
    }

    pub fn get_connection(&self) -> Result<SharedConnection> {
        if self.monitor.is_closed() {
            return Err(Self::closed_error());
        }
        let count = self.factories.len();
        if count == 0 {
            return Err(no_factory_available(None));
        }

        let initial = self.policy.initial_index(count);
        let mut last_error = None;
        for offset in 0..count {
            let index = (initial + offset) % count;
            let factory = &self.factories[index];
            if !factory.is_online() {
                last_error = factory.last_error().or(last_error);
                continue;
            }
            match factory.get_connection() {
                Ok(connection) => {
                    self.policy.selected(initial, index);
                    return Ok(connection);
                }
                Err(e) => {
                    debug!(self.log, "factory {} failed: {}", index, e);
                    last_error = Some(e);
                }
            }
        }
        Err(no_factory_available(last_error))
    }

    pub fn get_connection_async(self: &Arc<Self>) -> Promise<SharedConnection> {
        if self.monitor.is_closed() {
            return Promise::failed(Self::closed_error());
        }
        let count = self.factories.len();
        if count == 0 {
            return Promise::failed(no_factory_available(None));
        }
        let initial = self.policy.initial_index(count);
        Arc::clone(self).connect_from(initial, 0, None)
    }

    // Try the factories from `offset` onwards, moving to the next one each
    // time an attempt fails.
    fn connect_from(
        self: Arc<Self>,
        initial: usize,
        mut offset: usize,
        mut last_error: Option<Error>,
    ) -> Promise<SharedConnection> {
        let count = self.factories.len();
        while offset < count {
            let index = (initial + offset) % count;
            let factory = Arc::clone(&self.factories[index]);
            if !factory.is_online() {
                last_error = factory.last_error().or(last_error);
                offset += 1;
                continue;
            }

            let algorithm = Arc::clone(&self);
            let retry = Arc::clone(&self);
            return factory.get_connection_async().then_async_or_else(
                move |connection| {
                    algorithm.policy.selected(initial, index);
                    Promise::completed(connection)
                },
                move |e| {
                    if e.kind() == ErrorKind::Cancelled {
                        return Promise::failed(e);
                    }
                    debug!(retry.log, "factory {} failed: {}", index, e);
                    retry.connect_from(initial, offset + 1, Some(e))
                },
            );
        }
        Promise::failed(no_factory_available(last_error))
    }

    pub fn close(&self) {
        if self.monitor.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(self.log, "closing load balancer");
        for factory in &self.factories {
            factory.close();
        }
    }
}

/// A connection factory that spreads requests across other factories.
pub struct LoadBalancer {
    algorithm: Arc<LoadBalancingAlgorithm>,
}

impl LoadBalancer {
    pub fn new<P>(
        policy: P,
        factories: Vec<Box<dyn ConnectionFactory>>,
        options: LoadBalancerOptions,
    ) -> Self
    where
        P: LoadBalancingPolicy + 'static,
    {
        LoadBalancer {
            algorithm: Arc::new(LoadBalancingAlgorithm::new(policy, factories, options)),
        }
    }

    pub fn round_robin(
        factories: Vec<Box<dyn ConnectionFactory>>,
        options: LoadBalancerOptions,
    ) -> Self {
        Self::new(RoundRobin::new(), factories, options)
    }

    pub fn failover(
        factories: Vec<Box<dyn ConnectionFactory>>,
        options: LoadBalancerOptions,
    ) -> Self {
        Self::new(Failover, factories, options)
    }

    pub fn algorithm(&self) -> &LoadBalancingAlgorithm {
        &self.algorithm
    }

    /// The state of each factory, in order, with the error that took it
    /// offline.
    pub fn factory_states(&self) -> Vec<(FactoryState, Option<Error>)> {
        self.algorithm
            .factories()
            .iter()
            .map(|f| (f.state(), f.last_error()))
            .collect()
    }
}

impl ConnectionFactory for LoadBalancer {
    fn get_connection_async(&self) -> Promise<SharedConnection> {
        self.algorithm.get_connection_async()
    }

    fn get_connection(&self) -> Result<SharedConnection> {
        self.algorithm.get_connection()
    }

    fn close(&self) {
        self.algorithm.close()
    }

    fn name(&self) -> String {
        String::from(self.algorithm.name())
    }
}
