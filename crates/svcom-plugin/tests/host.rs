use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use parking_lot::Mutex;
use svcom_plugin::{
    BridgeBinding, LengthPrefix, NetworkBridge, NetworkBridgeFactory, PluginConfig, PluginError,
    PluginHost, PollStatus, Result,
};
use svcom_runtime::{
    BridgeIdentity, FindResultChangeCallback, FindSubscription, Payload, RequestServiceFn, Runtime,
    ServiceBridgeRegistration, ServiceInstance, ServiceInterface, ServiceInterfaceConfiguration,
    ServiceRequest, SubscribeFindServiceFn, Version,
};

const TIMEOUT: Duration = Duration::from_secs(5);

type PendingFinds = Arc<Mutex<Vec<(ServiceInterface, FindResultChangeCallback)>>>;

/// Announces every forwarded find as an instance named after the network
/// interface it is bound to.
struct LoopbackBridge {
    instance: ServiceInstance,
    pending: PendingFinds,
    _registration: ServiceBridgeRegistration,
}

impl LoopbackBridge {
    fn create(runtime: &Runtime, binding: &BridgeBinding) -> Result<Box<dyn NetworkBridge>> {
        let pending = PendingFinds::default();
        let finds = pending.clone();
        let subscribe: SubscribeFindServiceFn = Arc::new(
            move |callback: FindResultChangeCallback,
                  interface: &ServiceInterface,
                  _instance: Option<&ServiceInstance>| {
                finds.lock().push((interface.clone(), callback));
                FindSubscription::empty()
            },
        );
        let request: RequestServiceFn = Arc::new(
            |_: &ServiceInterfaceConfiguration, _: &ServiceInstance| ServiceRequest::empty(),
        );
        let registration = runtime.register_service_bridge(
            BridgeIdentity::new("loopback"),
            Some(subscribe),
            Some(request),
        )?;
        Ok(Box::new(Self {
            instance: ServiceInstance::new(binding.network_interface.clone()),
            pending,
            _registration: registration,
        }))
    }
}

impl NetworkBridge for LoopbackBridge {
    fn name(&self) -> &str {
        "loopback"
    }

    fn poll(&mut self) -> Result<PollStatus> {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        if pending.is_empty() {
            return Ok(PollStatus::Idle);
        }
        for (interface, callback) in pending {
            callback(
                &interface,
                &self.instance,
                svcom_runtime::FindResultStatus::Added,
            );
        }
        Ok(PollStatus::Progress)
    }
}

struct OneShot;

impl NetworkBridge for OneShot {
    fn name(&self) -> &str {
        "one-shot"
    }

    fn poll(&mut self) -> Result<PollStatus> {
        Ok(PollStatus::Finished)
    }
}

fn loopback_factory() -> NetworkBridgeFactory {
    Arc::new(LoopbackBridge::create)
}

fn interface() -> ServiceInterface {
    ServiceInterface::new("vehicle.speed", Version::new(1, 0))
}

#[test]
fn started_bridge_reports_services_to_the_runtime() {
    let runtime = Runtime::new();
    let host = PluginHost::new(PluginConfig::default().with_binding(BridgeBinding::new("lo")));
    let _registration = host.bridges().register("loopback", loopback_factory());

    let mut running = host
        .start_bridges(&runtime)
        .expect("loopback bridge should start");
    assert_eq!(running.names(), vec!["loopback"]);

    let (tx, rx) = channel::unbounded();
    let _find = runtime.subscribe_find_service(
        move |instances: &[ServiceInstance]| {
            let _ = tx.send(instances.to_vec());
        },
        interface(),
        None,
    );

    assert_eq!(
        running.poll_all().expect("poll should succeed"),
        1,
        "the forwarded find should be answered"
    );
    assert_eq!(running.poll_all().expect("poll should succeed"), 0);

    loop {
        let instances = rx.recv_timeout(TIMEOUT).expect("find results should arrive");
        if !instances.is_empty() {
            assert_eq!(instances, vec![ServiceInstance::new("lo")]);
            break;
        }
    }
}

#[test]
fn factory_failure_names_the_bridge() {
    let runtime = Runtime::new();
    let host = PluginHost::default();
    let failing: NetworkBridgeFactory = Arc::new(|_: &Runtime, _: &BridgeBinding| {
        Err(PluginError::Transform("no socket".to_string()))
    });
    let _registration = host.bridges().register("broken", failing);

    let err = host
        .start_bridges(&runtime)
        .expect_err("broken bridge should fail to start");
    match err {
        PluginError::Bridge { name, message } => {
            assert_eq!(name, "broken");
            assert!(message.contains("no socket"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn finished_bridges_are_dropped() {
    let runtime = Runtime::new();
    let host = PluginHost::default();
    let one_shot: NetworkBridgeFactory =
        Arc::new(|_: &Runtime, _: &BridgeBinding| Ok(Box::new(OneShot) as Box<dyn NetworkBridge>));
    let _registration = host.bridges().register("one-shot", one_shot);

    let mut running = host.start_bridges(&runtime).expect("bridge should start");
    assert_eq!(running.len(), 1);
    assert_eq!(running.poll_all().expect("poll should succeed"), 0);
    assert!(running.is_empty());
}

#[test]
fn unregistered_bridges_are_not_started() {
    let runtime = Runtime::new();
    let host = PluginHost::default();
    drop(host.bridges().register("loopback", loopback_factory()));

    let running = host.start_bridges(&runtime).expect("no bridges should start");
    assert!(running.is_empty());
}

#[test]
fn transforms_are_looked_up_by_name() {
    let runtime = Runtime::new();
    let host = PluginHost::default();
    let _registration = host
        .transforms()
        .register("length-prefix", LengthPrefix::factory());

    let transform = host
        .transform("length-prefix", &runtime)
        .expect("registered transform should instantiate");
    let wire = transform
        .to_wire(&Payload::from("42"))
        .expect("payload should encode");
    assert_eq!(wire.header_size(), 4);

    let err = host
        .transform("zstd", &runtime)
        .err()
        .expect("unknown transform should fail");
    assert!(matches!(err, PluginError::NotFound(name) if name == "zstd"));
}
