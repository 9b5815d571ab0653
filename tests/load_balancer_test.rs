mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ldap_connection_core::connection::Connection;
use ldap_connection_core::error::{Error, ErrorKind, ResultCode};
use ldap_connection_core::factory::ConnectionFactory;
use ldap_connection_core::load_balancer::types::{
    FactoryState, LoadBalancerEventListener, LoadBalancerOptions, MonitoredFactory,
};
use ldap_connection_core::load_balancer::LoadBalancer;
use ldap_connection_core::scheduler::Scheduler;

use common::{boxed, served_by, test_logger, wait_until, MockFactory};

#[derive(Default)]
struct CountEvents {
    online: AtomicUsize,
    offline: AtomicUsize,
    offline_names: Mutex<Vec<String>>,
}

impl LoadBalancerEventListener for CountEvents {
    fn handle_connection_factory_online(&self, _factory: &MonitoredFactory) {
        self.online.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection_factory_offline(&self, factory: &MonitoredFactory, _error: &Error) {
        self.offline.fetch_add(1, Ordering::SeqCst);
        self.offline_names
            .lock()
            .unwrap()
            .push(factory.name().to_string());
    }
}

fn options(monitoring_interval: u64, events: Option<Arc<CountEvents>>) -> LoadBalancerOptions {
    LoadBalancerOptions {
        monitoring_interval: Some(monitoring_interval),
        event_listener: events.map(|e| e as Arc<dyn LoadBalancerEventListener>),
        scheduler: None,
        log: Some(test_logger()),
    }
}

fn acquire(balancer: &LoadBalancer) -> String {
    let connection = balancer.get_connection().unwrap();
    let name = served_by(&connection);
    connection.close();
    name
}

#[test]
fn round_robin_visits_every_factory() {
    let (a, b, c) = (MockFactory::new("a"), MockFactory::new("b"), MockFactory::new("c"));
    let balancer = LoadBalancer::round_robin(boxed(&[&a, &b, &c]), options(60_000, None));

    let order: Vec<String> = (0..6).map(|_| acquire(&balancer)).collect();
    assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn round_robin_single_factory() {
    let a = MockFactory::new("a");
    let balancer = LoadBalancer::round_robin(boxed(&[&a]), options(60_000, None));

    for _ in 0..3 {
        assert_eq!(acquire(&balancer), "a");
    }
}

#[test]
fn round_robin_skips_quarantined_factory() {
    let (a, b, c) = (MockFactory::new("a"), MockFactory::new("b"), MockFactory::new("c"));
    b.set_failing(true);
    let events = Arc::new(CountEvents::default());
    let balancer = LoadBalancer::round_robin(
        boxed(&[&a, &b, &c]),
        options(60_000, Some(events.clone())),
    );

    let order: Vec<String> = (0..6).map(|_| acquire(&balancer)).collect();
    assert_eq!(order, vec!["a", "c", "a", "c", "a", "c"]);

    // Only the first request tried the failing factory.
    assert_eq!(b.attempts(), 1);
    assert_eq!(events.offline.load(Ordering::SeqCst), 1);
    assert_eq!(*events.offline_names.lock().unwrap(), vec![String::from("b")]);

    let states = balancer.factory_states();
    assert_eq!(states[1].0, FactoryState::Offline);
    assert_eq!(
        states[1].1.as_ref().map(|e| e.code()),
        Some(ResultCode::ClientSideConnectError)
    );
    assert_eq!(states[0].0, FactoryState::Online);
}

#[test]
fn round_robin_concurrent_acquisitions_spread_load() {
    let factories: Vec<Arc<MockFactory>> = (0..4)
        .map(|i| MockFactory::new(&format!("f{}", i)))
        .collect();
    let refs: Vec<&Arc<MockFactory>> = factories.iter().collect();
    let balancer = Arc::new(LoadBalancer::round_robin(boxed(&refs), options(60_000, None)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let balancer = balancer.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    balancer.get_connection().unwrap().close();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for factory in &factories {
        assert_eq!(factory.attempts(), 20);
    }
}

#[test]
fn failover_prefers_first_factory() {
    let (a, b, c) = (MockFactory::new("a"), MockFactory::new("b"), MockFactory::new("c"));
    a.set_failing(true);
    let events = Arc::new(CountEvents::default());
    let balancer = LoadBalancer::failover(boxed(&[&a, &b, &c]), options(20, Some(events.clone())));

    assert_eq!(acquire(&balancer), "b");
    assert_eq!(acquire(&balancer), "b");

    a.set_failing(false);
    assert!(wait_until(Duration::from_secs(5), || {
        balancer.factory_states()[0].0 == FactoryState::Online
    }));

    assert_eq!(acquire(&balancer), "a");
    assert_eq!(acquire(&balancer), "a");
    assert_eq!(c.attempts(), 0);
    assert_eq!(events.online.load(Ordering::SeqCst), 1);
}

#[test]
fn failover_quarantine_and_single_recovery() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    let events = Arc::new(CountEvents::default());
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), options(10, Some(events.clone())));

    assert_eq!(acquire(&balancer), "b");
    assert_eq!(events.offline.load(Ordering::SeqCst), 1);

    // The probe keeps retrying the offline factory in the background.
    assert!(wait_until(Duration::from_secs(5), || a.attempts() >= 3));
    assert_eq!(balancer.factory_states()[0].0, FactoryState::Offline);
    assert_eq!(acquire(&balancer), "b");
    assert_eq!(events.offline.load(Ordering::SeqCst), 1);

    a.set_failing(false);
    assert!(wait_until(Duration::from_secs(5), || {
        events.online.load(Ordering::SeqCst) == 1
    }));

    // Once online, probing stops and no further events are raised.
    let attempts = a.attempts();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(a.attempts(), attempts);
    assert_eq!(events.online.load(Ordering::SeqCst), 1);

    // Probe connections are closed immediately.
    assert_eq!(a.open_connections(), 0);
    assert_eq!(acquire(&balancer), "a");
}

#[test]
fn load_balancer_all_failing_reports_last_error() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    b.set_failing(true);
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), options(60_000, None));

    let err = balancer.get_connection().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.message().starts_with("b "), "unexpected error: {}", err);

    // Both factories are now offline; their stored errors are reported
    // without further attempts.
    let err = balancer.get_connection().err().unwrap();
    assert_eq!(err.code(), ResultCode::ClientSideConnectError);
    assert_eq!(a.attempts(), 1);
    assert_eq!(b.attempts(), 1);
}

#[test]
fn load_balancer_without_factories() {
    let balancer = LoadBalancer::round_robin(Vec::new(), options(60_000, None));
    let err = balancer.get_connection().err().unwrap();
    assert_eq!(err.code(), ResultCode::ClientSideServerDown);
    let err = balancer.get_connection_async().get().err().unwrap();
    assert_eq!(err.code(), ResultCode::ClientSideServerDown);
}

#[test]
fn load_balancer_async_acquisition_skips_failures() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), options(60_000, None));

    let connection = balancer.get_connection_async().get().unwrap();
    assert_eq!(served_by(&connection), "b");
    assert_eq!(balancer.factory_states()[0].0, FactoryState::Offline);

    b.set_failing(true);
    let err = balancer.get_connection_async().get().err().unwrap();
    assert_eq!(err.code(), ResultCode::ClientSideConnectError);
}

#[test]
fn load_balancer_close_stops_probes() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    let opts = LoadBalancerOptions {
        scheduler: Some(Arc::new(Scheduler::new())),
        ..options(10, None)
    };
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), opts);

    assert_eq!(acquire(&balancer), "b");
    balancer.close();
    assert!(a.is_closed());
    assert!(b.is_closed());

    let err = balancer.get_connection().err().unwrap();
    assert_eq!(err.code(), ResultCode::ClientSideServerDown);

    thread::sleep(Duration::from_millis(50));
    let attempts = a.attempts();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(a.attempts(), attempts);
    assert_eq!(balancer.factory_states()[0].0, FactoryState::Offline);
}

#[test]
fn load_balancer_names() {
    let a = MockFactory::new("a");
    let round_robin = LoadBalancer::round_robin(boxed(&[&a]), options(60_000, None));
    let failover = LoadBalancer::failover(boxed(&[&a]), options(60_000, None));
    assert_eq!(round_robin.name(), "RoundRobinLoadBalancer");
    assert_eq!(failover.name(), "FailoverLoadBalancer");
    assert_eq!(round_robin.algorithm().factories()[0].name(), "a");
}

#[test]
fn load_balancer_recovery_after_close_is_ignored() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    let events = Arc::new(CountEvents::default());
    let opts = LoadBalancerOptions {
        scheduler: Some(Arc::new(Scheduler::new())),
        ..options(10, Some(events.clone()))
    };
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), opts);
    assert_eq!(acquire(&balancer), "b");

    // The backend recovers, but the next health check stays in flight.
    a.set_holding(true);
    a.set_failing(false);
    assert!(wait_until(Duration::from_secs(5), || a.held() == 1));

    balancer.close();
    a.release_held();

    assert_eq!(events.online.load(Ordering::SeqCst), 0);
    assert_eq!(balancer.factory_states()[0].0, FactoryState::Offline);
    assert_eq!(a.open_connections(), 0);
}

#[test]
fn round_robin_async_skips_quarantined_factory() {
    let (a, b, c) = (MockFactory::new("a"), MockFactory::new("b"), MockFactory::new("c"));
    b.set_failing(true);
    let balancer = LoadBalancer::round_robin(boxed(&[&a, &b, &c]), options(60_000, None));

    let order: Vec<String> = (0..6)
        .map(|_| {
            let connection = balancer.get_connection_async().get().unwrap();
            let name = served_by(&connection);
            connection.close();
            name
        })
        .collect();

    assert_eq!(order, vec!["a", "c", "a", "c", "a", "c"]);
    assert_eq!(b.attempts(), 1);
    assert_eq!(balancer.factory_states()[1].0, FactoryState::Offline);
}

// Brings the backend back while the offline notification is still running.
struct RecoverDuringOffline {
    backend: Arc<MockFactory>,
    order: Mutex<Vec<&'static str>>,
}

impl LoadBalancerEventListener for RecoverDuringOffline {
    fn handle_connection_factory_online(&self, _factory: &MonitoredFactory) {
        self.order.lock().unwrap().push("online");
    }

    fn handle_connection_factory_offline(&self, _factory: &MonitoredFactory, _error: &Error) {
        self.backend.set_failing(false);
        thread::sleep(Duration::from_millis(100));
        self.order.lock().unwrap().push("offline");
    }
}

#[test]
fn load_balancer_events_follow_state_changes() {
    let (a, b) = (MockFactory::new("a"), MockFactory::new("b"));
    a.set_failing(true);
    let events = Arc::new(RecoverDuringOffline {
        backend: a.clone(),
        order: Mutex::new(Vec::new()),
    });
    let opts = LoadBalancerOptions {
        monitoring_interval: Some(5),
        event_listener: Some(events.clone() as Arc<dyn LoadBalancerEventListener>),
        scheduler: Some(Arc::new(Scheduler::new())),
        log: Some(test_logger()),
    };
    let balancer = LoadBalancer::failover(boxed(&[&a, &b]), opts);

    assert_eq!(acquire(&balancer), "b");
    assert!(wait_until(Duration::from_secs(5), || {
        events.order.lock().unwrap().len() == 2
    }));
    assert_eq!(*events.order.lock().unwrap(), vec!["offline", "online"]);
}
