/*
 * Copyright 2020 Joyent, Inc.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use derive_more::Display;
use slog::{debug, info, o, warn, Logger};

use crate::connection::SharedConnection;
use crate::error::{Error, ErrorKind, Result};
use crate::factory::ConnectionFactory;
use crate::promise::Promise;
use crate::scheduler::{ScheduledTask, Scheduler};

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FactoryState {
    #[display(fmt = "online")]
    Online,
    #[display(fmt = "offline")]
    Offline,
}

/// Notified when a load-balanced factory goes offline or comes back.
///
/// The notifications for one factory are delivered one at a time, in the
/// order of its state changes. A listener must not acquire connections
/// from the load balancer that notified it.
pub trait LoadBalancerEventListener: Send + Sync {
    fn handle_connection_factory_online(&self, factory: &MonitoredFactory);

    fn handle_connection_factory_offline(&self, factory: &MonitoredFactory, error: &Error);
}

/// Logs factory state changes. This is the listener used when none is
/// configured.
pub struct LogEvents {
    log: Logger,
}

impl LogEvents {
    pub fn new(log: Logger) -> Self {
        LogEvents { log }
    }
}

impl LoadBalancerEventListener for LogEvents {
    fn handle_connection_factory_online(&self, factory: &MonitoredFactory) {
        info!(self.log, "connection factory is online";
            "index" => factory.index(), "factory" => factory.name());
    }

    fn handle_connection_factory_offline(&self, factory: &MonitoredFactory, error: &Error) {
        warn!(self.log, "connection factory is offline: {}", error;
            "index" => factory.index(), "factory" => factory.name());
    }
}

#[derive(Clone, Default)]
pub struct LoadBalancerOptions {
    /// Milliseconds between probes of an offline factory.
    pub monitoring_interval: Option<u64>,
    pub event_listener: Option<Arc<dyn LoadBalancerEventListener>>,
    /// Runs the probes. Defaults to the process-wide scheduler.
    pub scheduler: Option<Arc<Scheduler>>,
    pub log: Option<Logger>,
}

pub(crate) struct Monitor {
    pub interval: Duration,
    pub scheduler: Arc<Scheduler>,
    pub listener: Arc<dyn LoadBalancerEventListener>,
    pub closed: AtomicBool,
}

impl Monitor {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct Status {
    state: FactoryState,
    last_error: Option<Error>,
    probe: Option<ScheduledTask>,
}

/// A factory managed by a load balancer, together with its health.
///
/// An acquisition failure takes the factory offline and starts a repeating
/// probe. The first successful probe brings it back online and stops the
/// probe.
pub struct MonitoredFactory {
    index: usize,
    name: String,
    factory: Box<dyn ConnectionFactory>,
    status: Mutex<Status>,
    // Held across a state change and its notification.
    events: Mutex<()>,
    probe_in_progress: AtomicBool,
    monitor: Arc<Monitor>,
    log: Logger,
}

impl MonitoredFactory {
    pub(crate) fn new(
        index: usize,
        factory: Box<dyn ConnectionFactory>,
        monitor: Arc<Monitor>,
        log: &Logger,
    ) -> Self {
        let name = factory.name();
        let log = log.new(o!("index" => index, "factory" => name.clone()));
        MonitoredFactory {
            index,
            name,
            factory,
            status: Mutex::new(Status {
                state: FactoryState::Online,
                last_error: None,
                probe: None,
            }),
            events: Mutex::new(()),
            probe_in_progress: AtomicBool::new(false),
            monitor,
            log,
        }
    }

    fn lock(&self) -> MutexGuard<Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The position of the factory in the load balancer's list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FactoryState {
        self.lock().state
    }

    pub fn is_online(&self) -> bool {
        self.state() == FactoryState::Online
    }

    /// The most recent acquisition or probe failure while offline.
    pub fn last_error(&self) -> Option<Error> {
        self.lock().last_error.clone()
    }

    pub(crate) fn get_connection(self: &Arc<Self>) -> Result<SharedConnection> {
        self.factory.get_connection().map_err(|e| {
            self.mark_offline(&e);
            e
        })
    }

    pub(crate) fn get_connection_async(self: &Arc<Self>) -> Promise<SharedConnection> {
        let factory = Arc::clone(self);
        self.factory.get_connection_async().then_or_else(Ok, move |e| {
            factory.mark_offline(&e);
            Err(e)
        })
    }

    fn mark_offline(self: &Arc<Self>, error: &Error) {
        // A caller giving up says nothing about the health of the server.
        if error.kind() == ErrorKind::Cancelled {
            return;
        }

        let _events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let went_offline = {
            let mut status = self.lock();
            status.last_error = Some(error.clone());
            if status.state == FactoryState::Online && !self.monitor.is_closed() {
                status.state = FactoryState::Offline;
                status.probe = Some(self.schedule_probe());
                true
            } else {
                false
            }
        };

        if went_offline {
            debug!(self.log, "factory went offline, probing every {:?}", self.monitor.interval);
            self.monitor
                .listener
                .handle_connection_factory_offline(self, error);
        }
    }

    fn schedule_probe(self: &Arc<Self>) -> ScheduledTask {
        let factory = Arc::downgrade(self);
        self.monitor
            .scheduler
            .schedule_repeating(self.monitor.interval, move || {
                if let Some(factory) = factory.upgrade() {
                    factory.probe();
                }
            })
    }

    fn probe(self: &Arc<Self>) {
        if self.monitor.is_closed() || self.is_online() {
            return;
        }
        if self.probe_in_progress.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(self.log, "probing offline factory");
        let factory = Arc::clone(self);
        self.factory.get_connection_async().on_complete(move |result| {
            factory.probe_in_progress.store(false, Ordering::Release);
            match result {
                Ok(connection) => {
                    connection.close();
                    factory.mark_online();
                }
                Err(e) => {
                    debug!(factory.log, "probe failed: {}", e);
                    factory.lock().last_error = Some(e.clone());
                }
            }
        });
    }

    fn mark_online(&self) {
        let _events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let probe = {
            let mut status = self.lock();
            if status.state == FactoryState::Online || self.monitor.is_closed() {
                return;
            }
            status.state = FactoryState::Online;
            status.last_error = None;
            status.probe.take()
        };
        if let Some(probe) = probe {
            probe.cancel();
        }

        self.monitor.listener.handle_connection_factory_online(self);
    }

    pub(crate) fn close(&self) {
        if let Some(probe) = self.lock().probe.take() {
            probe.cancel();
        }
        self.factory.close();
    }
}
