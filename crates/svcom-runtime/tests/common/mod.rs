#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use svcom_runtime::{
    ClientCallbacks, ClientConnector, DisabledServerConnector, EventId, EventState,
    FindResultStatus, MethodCall, MethodInvocation, MethodReply, Payload, PosixCredentials,
    Runtime, RuntimeConfig, ServerCallbacks, ServiceInstance, ServiceInterface,
    ServiceInterfaceConfiguration, ServiceState, Version,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(150);
/// Upper bound for a whole concurrent run; exceeding it means a deadlock.
pub const STRESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Methods understood by [`echo_server`].
pub const ECHO: u16 = 0;
pub const REJECT: u16 = 1;
pub const HOLD: u16 = 2;
pub const WHOAMI: u16 = 3;
pub const FAIL: u16 = 4;

pub fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_name("test"))
}

pub fn interface(minor: u16) -> ServiceInterface {
    ServiceInterface::new("vehicle.speed", Version::new(1, minor))
}

pub fn configuration(minor: u16) -> ServiceInterfaceConfiguration {
    ServiceInterfaceConfiguration::new(interface(minor), 5, 2)
}

pub fn instance(name: &str) -> ServiceInstance {
    ServiceInstance::new(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    State(ServiceState),
    Update(EventId, Payload),
    Requested(EventId, Payload),
    Subscription(EventId, EventState),
}

pub fn recording_callbacks() -> (ClientCallbacks, Receiver<ClientEvent>) {
    let (tx, rx) = channel::unbounded();
    let (state_tx, update_tx, requested_tx, subscription_tx) =
        (tx.clone(), tx.clone(), tx.clone(), tx);
    let callbacks = ClientCallbacks::new()
        .on_service_state_change(move |_, state, _| {
            let _ = state_tx.send(ClientEvent::State(state));
        })
        .on_event_update(move |_, id, payload| {
            let _ = update_tx.send(ClientEvent::Update(id, payload));
        })
        .on_requested_event_update(move |_, id, payload| {
            let _ = requested_tx.send(ClientEvent::Requested(id, payload));
        })
        .on_event_subscription_state_change(move |_, id, state| {
            let _ = subscription_tx.send(ClientEvent::Subscription(id, state));
        });
    (callbacks, rx)
}

pub fn client(
    runtime: &Runtime,
    configuration: ServiceInterfaceConfiguration,
    name: &str,
) -> (ClientConnector, Receiver<ClientEvent>) {
    let (callbacks, rx) = recording_callbacks();
    let client = runtime
        .make_client_connector(configuration, instance(name), callbacks)
        .expect("client connector should be created");
    (client, rx)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Subscription(EventId, EventState),
    UpdateRequest(EventId),
}

/// Replies parked by the [`HOLD`] method.
pub type HeldReplies = Arc<Mutex<Vec<MethodReply>>>;

pub struct EchoServer {
    pub server: DisabledServerConnector,
    pub events: Receiver<ServerEvent>,
    pub held: HeldReplies,
}

pub fn echo_server(runtime: &Runtime, minor: u16, name: &str) -> EchoServer {
    echo_server_with_credentials(runtime, minor, name, runtime.config().credentials)
}

pub fn echo_server_with_credentials(
    runtime: &Runtime,
    minor: u16,
    name: &str,
    credentials: PosixCredentials,
) -> EchoServer {
    let (tx, events) = channel::unbounded();
    let request_tx = tx.clone();
    let held: HeldReplies = Arc::new(Mutex::new(Vec::new()));
    let parked = held.clone();

    let callbacks = ServerCallbacks::new()
        .on_method_call(move |_, call: MethodCall| {
            let MethodCall {
                method_id,
                payload,
                reply,
                credentials,
            } = call;
            match method_id {
                ECHO => reply.reply(payload),
                REJECT => return None,
                HOLD => parked.lock().push(reply),
                WHOAMI => reply.reply(Payload::from(
                    format!("{}:{}:{}", credentials.uid, credentials.gid, credentials.pid)
                        .into_bytes(),
                )),
                _ => reply.error(7, payload),
            }
            Some(MethodInvocation::detached())
        })
        .on_event_subscription_change(move |_, id, state| {
            let _ = tx.send(ServerEvent::Subscription(id, state));
        })
        .on_event_update_request(move |_, id| {
            let _ = request_tx.send(ServerEvent::UpdateRequest(id));
        });

    let server = runtime
        .make_server_connector_with_credentials(
            configuration(minor),
            instance(name),
            callbacks,
            credentials,
        )
        .expect("server connector should be created");
    EchoServer {
        server,
        events,
        held,
    }
}

/// Receive until `pick` accepts a message, failing after [`TIMEOUT`].
pub fn wait_for<T, R>(rx: &Receiver<T>, mut pick: impl FnMut(T) -> Option<R>) -> R
where
    T: std::fmt::Debug,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(message) => {
                if let Some(picked) = pick(message) {
                    return picked;
                }
            }
            Err(RecvTimeoutError::Timeout) => panic!("expected message did not arrive"),
            Err(RecvTimeoutError::Disconnected) => panic!("channel closed while waiting"),
        }
    }
}

/// Receive exactly `expected` as the next message.
pub fn expect_next<T>(rx: &Receiver<T>, expected: T)
where
    T: std::fmt::Debug + PartialEq,
{
    let message = rx
        .recv_timeout(TIMEOUT)
        .expect("message should arrive before timeout");
    assert_eq!(message, expected);
}

pub fn wait_available(rx: &Receiver<ClientEvent>) {
    expect_next(rx, ClientEvent::State(ServiceState::Available));
}

/// Assert nothing arrives for [`QUIET`].
pub fn assert_quiet<T: std::fmt::Debug>(rx: &Receiver<T>) {
    if let Ok(message) = rx.recv_timeout(QUIET) {
        panic!("unexpected message: {message:?}");
    }
}

/// Run `jobs` on their own threads and fail if they do not all finish within
/// [`STRESS_TIMEOUT`].
pub fn run_concurrently(jobs: Vec<Box<dyn FnOnce() + Send>>) {
    let (done_tx, done_rx) = channel::unbounded();
    let workers: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let done = done_tx.clone();
            thread::spawn(move || {
                job();
                let _ = done.send(());
            })
        })
        .collect();
    drop(done_tx);

    let deadline = Instant::now() + STRESS_TIMEOUT;
    for _ in 0..workers.len() {
        done_rx
            .recv_deadline(deadline)
            .expect("concurrent jobs should finish without deadlocking");
    }
    for worker in workers {
        worker.join().expect("job should not panic");
    }
}

/// Enable and disable a server for [`interface`] `rounds` times.
pub fn toggle_server(runtime: &Runtime, name: &str, rounds: usize) {
    let mut server = echo_server(runtime, 0, name).server;
    for _ in 0..rounds {
        let enabled = server.enable();
        thread::yield_now();
        server = enabled.disable();
    }
}

/// Create and drop find subscriptions for [`interface`], alternating both
/// forms. `late` counts callbacks that ran after their drop returned.
pub fn churn_find_subscriptions(runtime: &Runtime, rounds: usize, late: &Arc<AtomicUsize>) {
    for round in 0..rounds {
        let dropped = Arc::new(AtomicBool::new(false));
        let seen = dropped.clone();
        let late = late.clone();
        let find = if round % 2 == 0 {
            runtime.subscribe_find_service_changes(
                move |_: &ServiceInterface, _: &ServiceInstance, _: FindResultStatus| {
                    if seen.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                },
                Some(interface(0)),
                None,
                None,
            )
        } else {
            runtime.subscribe_find_service(
                move |_: &[ServiceInstance]| {
                    if seen.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                },
                interface(0),
                None,
            )
        };
        if round % 3 == 0 {
            thread::sleep(Duration::from_micros(50));
        }
        drop(find);
        dropped.store(true, Ordering::SeqCst);
    }
}
