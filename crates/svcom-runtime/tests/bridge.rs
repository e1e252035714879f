mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use common::*;
use parking_lot::Mutex;
use svcom_runtime::{
    BridgeIdentity, ConstructionError, Error, FindResultChangeCallback, FindResultStatus,
    FindSubscription, RequestServiceFn, ServiceInstance, ServiceInterface,
    ServiceInterfaceConfiguration, ServiceRequest, ServiceState, SubscribeFindServiceFn,
};

/// Counts live handles handed out by the fake bridge.
struct Live(Arc<AtomicUsize>);

impl Live {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeBridge {
    finds: Mutex<Vec<(ServiceInterface, Option<ServiceInstance>, FindResultChangeCallback)>>,
    requests: Mutex<Vec<(ServiceInterfaceConfiguration, ServiceInstance)>>,
    live_finds: Arc<AtomicUsize>,
    live_requests: Arc<AtomicUsize>,
}

impl FakeBridge {
    fn functions(self: &Arc<Self>) -> (SubscribeFindServiceFn, RequestServiceFn) {
        let bridge = self.clone();
        let subscribe: SubscribeFindServiceFn = Arc::new(
            move |callback: FindResultChangeCallback,
                  interface: &ServiceInterface,
                  instance: Option<&ServiceInstance>| {
                bridge
                    .finds
                    .lock()
                    .push((interface.clone(), instance.cloned(), callback));
                FindSubscription::from_guard(Live::new(&bridge.live_finds))
            },
        );
        let bridge = self.clone();
        let request: RequestServiceFn = Arc::new(
            move |configuration: &ServiceInterfaceConfiguration, instance: &ServiceInstance| {
                bridge
                    .requests
                    .lock()
                    .push((configuration.clone(), instance.clone()));
                ServiceRequest::from_guard(Live::new(&bridge.live_requests))
            },
        );
        (subscribe, request)
    }

    fn report(&self, instance: &str, status: FindResultStatus) {
        let finds = self.finds.lock();
        let (interface, _, callback) = finds.first().expect("a find should have been forwarded");
        callback(interface, &ServiceInstance::new(instance), status);
    }
}

fn register(
    runtime: &svcom_runtime::Runtime,
    name: &str,
) -> (Arc<FakeBridge>, svcom_runtime::ServiceBridgeRegistration) {
    let bridge = Arc::new(FakeBridge::default());
    let (subscribe, request) = bridge.functions();
    let registration = runtime
        .register_service_bridge(BridgeIdentity::new(name), Some(subscribe), Some(request))
        .expect("bridge should register");
    (bridge, registration)
}

#[test]
fn bridge_without_functions_is_rejected() {
    let runtime = runtime();
    let bridge = Arc::new(FakeBridge::default());
    let (subscribe, _) = bridge.functions();
    let result =
        runtime.register_service_bridge(BridgeIdentity::new("half"), Some(subscribe), None);
    assert!(matches!(
        result,
        Err(Error::Construction(ConstructionError::CallbackMissing))
    ));
}

#[test]
fn finds_are_forwarded_and_remote_services_reported() {
    let runtime = runtime();
    let (bridge, registration) = register(&runtime, "net");

    let (tx, rx) = channel::unbounded();
    let find = runtime.subscribe_find_service(
        move |instances: &[ServiceInstance]| {
            let _ = tx.send(instances.iter().map(|i| i.id.clone()).collect::<Vec<_>>());
        },
        interface(0),
        None,
    );
    expect_next(&rx, Vec::<String>::new());
    assert_eq!(bridge.finds.lock().len(), 1);
    assert_eq!(bridge.live_finds.load(Ordering::SeqCst), 1);

    bridge.report("remote", FindResultStatus::Added);
    expect_next(&rx, vec!["remote".to_string()]);

    drop(registration);
    expect_next(&rx, Vec::<String>::new());
    assert_eq!(bridge.live_finds.load(Ordering::SeqCst), 0);

    // Reports after deregistration are ignored.
    bridge.report("late", FindResultStatus::Added);
    assert_quiet(&rx);
    drop(find);
}

#[test]
fn dropping_the_last_find_releases_the_bridge_handle() {
    let runtime = runtime();
    let (bridge, _registration) = register(&runtime, "net");

    let first = runtime.subscribe_find_service(|_: &[ServiceInstance]| (), interface(0), None);
    let second = runtime.subscribe_find_service(|_: &[ServiceInstance]| (), interface(0), None);
    assert_eq!(bridge.finds.lock().len(), 1);
    assert_eq!(bridge.live_finds.load(Ordering::SeqCst), 1);

    drop(first);
    assert_eq!(bridge.live_finds.load(Ordering::SeqCst), 1);
    drop(second);
    assert_eq!(bridge.live_finds.load(Ordering::SeqCst), 0);
}

#[test]
fn existing_finds_and_requests_are_replayed_to_a_new_bridge() {
    let runtime = runtime();
    let _find = runtime.subscribe_find_service(|_: &[ServiceInstance]| (), interface(0), None);
    let (_client, _rx) = client(&runtime, configuration(0), "remote");

    let (bridge, _registration) = register(&runtime, "net");
    assert_eq!(bridge.finds.lock().len(), 1);
    let requests = bridge.requests.lock().clone();
    assert_eq!(requests, vec![(configuration(0), instance("remote"))]);
}

#[test]
fn wildcard_finds_are_not_forwarded() {
    let runtime = runtime();
    let (bridge, _registration) = register(&runtime, "net");
    let _find = runtime.subscribe_find_service_changes(
        |_: &ServiceInterface, _: &ServiceInstance, _| (),
        None,
        None,
        None,
    );
    assert!(bridge.finds.lock().is_empty());
}

#[test]
fn a_bridge_does_not_see_its_own_finds_or_services() {
    let runtime = runtime();
    let identity = BridgeIdentity::new("net");
    let bridge = Arc::new(FakeBridge::default());
    let (subscribe, request) = bridge.functions();
    let _registration = runtime
        .register_service_bridge(identity, Some(subscribe), Some(request))
        .expect("bridge should register");

    // The bridge exporting local services subscribes on its own behalf.
    let (own_tx, own_rx) = channel::unbounded();
    let _own = runtime.subscribe_find_service_changes(
        move |_: &ServiceInterface, instance: &ServiceInstance, status| {
            let _ = own_tx.send((instance.id.clone(), status));
        },
        Some(interface(0)),
        None,
        Some(identity),
    );
    assert!(bridge.finds.lock().is_empty());

    let (tx, rx) = channel::unbounded();
    let _other = runtime.subscribe_find_service_changes(
        move |_: &ServiceInterface, instance: &ServiceInstance, status| {
            let _ = tx.send((instance.id.clone(), status));
        },
        Some(interface(0)),
        None,
        None,
    );
    assert_eq!(bridge.finds.lock().len(), 1);

    bridge.report("remote", FindResultStatus::Added);
    expect_next(&rx, ("remote".to_string(), FindResultStatus::Added));
    assert_quiet(&own_rx);

    let _local = echo_server(&runtime, 0, "local").server.enable();
    expect_next(&own_rx, ("local".to_string(), FindResultStatus::Added));
    expect_next(&rx, ("local".to_string(), FindResultStatus::Added));
}

#[test]
fn service_requests_live_as_long_as_waiting_clients() {
    let runtime = runtime();
    let (bridge, _registration) = register(&runtime, "net");

    let (first, _first_rx) = client(&runtime, configuration(0), "remote");
    let (second, _second_rx) = client(&runtime, configuration(0), "remote");
    assert_eq!(bridge.requests.lock().len(), 1);
    assert_eq!(bridge.live_requests.load(Ordering::SeqCst), 1);

    drop(first);
    assert_eq!(bridge.live_requests.load(Ordering::SeqCst), 1);
    drop(second);
    assert_eq!(bridge.live_requests.load(Ordering::SeqCst), 0);
}

#[test]
fn clients_of_a_local_service_issue_no_request() {
    let runtime = runtime();
    let (bridge, _registration) = register(&runtime, "net");
    let _server = echo_server(&runtime, 0, "local").server.enable();
    let (_client, rx) = client(&runtime, configuration(0), "local");
    wait_available(&rx);
    assert!(bridge.requests.lock().is_empty());
}

#[test]
fn requested_service_can_be_proxied_by_the_bridge() {
    let runtime = runtime();
    let proxy_runtime = runtime.clone();
    let request: RequestServiceFn = Arc::new(
        move |configuration: &ServiceInterfaceConfiguration, instance: &ServiceInstance| {
            let minor = configuration.interface.version.minor;
            let proxy = echo_server(&proxy_runtime, minor, &instance.id).server.enable();
            ServiceRequest::from_guard(proxy)
        },
    );
    let subscribe: SubscribeFindServiceFn = Arc::new(
        |_: FindResultChangeCallback, _: &ServiceInterface, _: Option<&ServiceInstance>| {
            FindSubscription::empty()
        },
    );
    let registration = runtime
        .register_service_bridge(BridgeIdentity::new("proxy"), Some(subscribe), Some(request))
        .expect("bridge should register");

    let (client, rx) = client(&runtime, configuration(0), "remote");
    wait_available(&rx);
    assert!(client.is_service_available());

    drop(registration);
    expect_next(&rx, ClientEvent::State(ServiceState::NotAvailable));
}

/// Keeps every forwarded find so services can be reported at any time.
#[derive(Default)]
struct ReportingBridge {
    finds: Mutex<Vec<(ServiceInterface, FindResultChangeCallback)>>,
}

impl ReportingBridge {
    fn register(
        self: &Arc<Self>,
        runtime: &svcom_runtime::Runtime,
        name: &str,
    ) -> svcom_runtime::ServiceBridgeRegistration {
        let bridge = self.clone();
        let subscribe: SubscribeFindServiceFn = Arc::new(
            move |callback: FindResultChangeCallback,
                  interface: &ServiceInterface,
                  _: Option<&ServiceInstance>| {
                bridge.finds.lock().push((interface.clone(), callback));
                FindSubscription::empty()
            },
        );
        let request: RequestServiceFn =
            Arc::new(|_: &ServiceInterfaceConfiguration, _: &ServiceInstance| {
                ServiceRequest::empty()
            });
        runtime
            .register_service_bridge(BridgeIdentity::new(name), Some(subscribe), Some(request))
            .expect("bridge should register")
    }

    /// Report `instance` on every forwarded find, outside the bridge's lock.
    fn report(&self, instance: &ServiceInstance, status: FindResultStatus) {
        let finds = self.finds.lock().clone();
        for (interface, callback) in &finds {
            callback(interface, instance, status);
        }
    }
}

#[test]
fn bridges_come_and_go_while_discovery_is_busy() {
    let runtime = runtime();
    let late = Arc::new(AtomicUsize::new(0));

    let mut jobs: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
    for worker in 0..2 {
        let runtime = runtime.clone();
        jobs.push(Box::new(move || {
            let remote = ServiceInstance::new(format!("remote-{worker}"));
            for round in 0..40 {
                let bridge = Arc::new(ReportingBridge::default());
                let registration = bridge.register(&runtime, &format!("churn-{worker}-{round}"));
                bridge.report(&remote, FindResultStatus::Added);
                bridge.report(&remote, FindResultStatus::Deleted);
                bridge.report(&remote, FindResultStatus::Added);
                drop(registration);
                bridge.report(&remote, FindResultStatus::Deleted);
            }
        }));
    }
    {
        let runtime = runtime.clone();
        jobs.push(Box::new(move || toggle_server(&runtime, "toggle", 50)));
    }
    for _ in 0..4 {
        let runtime = runtime.clone();
        let late = late.clone();
        jobs.push(Box::new(move || churn_find_subscriptions(&runtime, 100, &late)));
    }
    run_concurrently(jobs);

    thread::sleep(QUIET);
    assert_eq!(late.load(Ordering::SeqCst), 0);

    // Dropped registrations withdrew everything their bridges reported.
    let (tx, rx) = channel::unbounded();
    let _find = runtime.subscribe_find_service(
        move |instances: &[ServiceInstance]| {
            let _ = tx.send(instances.len());
        },
        interface(0),
        None,
    );
    expect_next(&rx, 0);
}
