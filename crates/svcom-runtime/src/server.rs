//! Provider side of a service instance.
//!
//! A server connector starts as a [`DisabledServerConnector`]. Enabling it
//! advertises the service and yields an [`EnabledServerConnector`], the only
//! handle that can publish events:
//!
//! ```compile_fail
//! # use svcom_runtime::*;
//! # fn publish(server: DisabledServerConnector) {
//! server.update_event(0, svcom_payload::Payload::empty().clone());
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use svcom_payload::{Payload, PayloadMut};

use crate::client::{ClientMessage, ClientShared, EventPayloadAllocateFn};
use crate::credentials::PosixCredentials;
use crate::dispatch::{self, DispatchSender, Dispatcher};
use crate::error::{ConnectorError, ConstructionError, Result, ServerConnectorError};
use crate::event::{EventId, EventMode, EventState};
use crate::method::{CallState, MethodCall, MethodId, MethodInvocation, MethodReply, MethodResult};
use crate::runtime::RuntimeInner;
use crate::service::{ServerServiceInterfaceConfiguration, ServiceInstance, ServiceInterface};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

type MethodCallFn = Box<dyn FnMut(&ServerContext, MethodCall) -> Option<MethodInvocation> + Send>;
type SubscriptionChangeFn = Box<dyn FnMut(&ServerContext, EventId, EventState) + Send>;
type UpdateRequestFn = Box<dyn FnMut(&ServerContext, EventId) + Send>;

/// Lets a provider hand out request buffers to its clients.
pub type MethodPayloadAllocateFn = Arc<dyn Fn(MethodId) -> Option<PayloadMut> + Send + Sync>;

/// Callbacks of a server connector.
///
/// `on_method_call`, `on_event_subscription_change` and
/// `on_event_update_request` are required.
#[derive(Default)]
pub struct ServerCallbacks {
    on_method_call: Option<MethodCallFn>,
    on_event_subscription_change: Option<SubscriptionChangeFn>,
    on_event_update_request: Option<UpdateRequestFn>,
    on_method_payload_allocate: Option<MethodPayloadAllocateFn>,
}

impl ServerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an inbound call. Return `None` to reject it; the caller then
    /// receives [`ConnectorError::RequestRejected`].
    pub fn on_method_call<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ServerContext, MethodCall) -> Option<MethodInvocation> + Send + 'static,
    {
        self.on_method_call = Some(Box::new(f));
        self
    }

    /// Called when the first client subscribes to an event and when the
    /// last one unsubscribes.
    pub fn on_event_subscription_change<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ServerContext, EventId, EventState) + Send + 'static,
    {
        self.on_event_subscription_change = Some(Box::new(f));
        self
    }

    /// Called when a client is waiting for a value and none was pending.
    /// Answer with [`ServerContext::update_requested_event`].
    pub fn on_event_update_request<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ServerContext, EventId) + Send + 'static,
    {
        self.on_event_update_request = Some(Box::new(f));
        self
    }

    /// Runs on the caller's thread.
    pub fn on_method_payload_allocate<F>(mut self, f: F) -> Self
    where
        F: Fn(MethodId) -> Option<PayloadMut> + Send + Sync + 'static,
    {
        self.on_method_payload_allocate = Some(Arc::new(f));
        self
    }

    pub(crate) fn into_handlers(self) -> Result<(ServerHandlers, Option<MethodPayloadAllocateFn>)> {
        let (
            Some(on_method_call),
            Some(on_event_subscription_change),
            Some(on_event_update_request),
        ) = (
            self.on_method_call,
            self.on_event_subscription_change,
            self.on_event_update_request,
        )
        else {
            return Err(ConstructionError::CallbackMissing.into());
        };
        let handlers = ServerHandlers {
            on_method_call,
            on_event_subscription_change,
            on_event_update_request,
        };
        Ok((handlers, self.on_method_payload_allocate))
    }
}

impl fmt::Debug for ServerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCallbacks")
            .field("on_method_call", &self.on_method_call.is_some())
            .field("on_event_subscription_change", &self.on_event_subscription_change.is_some())
            .field("on_event_update_request", &self.on_event_update_request.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct ServerHandlers {
    on_method_call: MethodCallFn,
    on_event_subscription_change: SubscriptionChangeFn,
    on_event_update_request: UpdateRequestFn,
}

impl ServerHandlers {
    fn handle(&mut self, ctx: &ServerContext, message: ServerMessage) {
        match message {
            ServerMessage::MethodCall { call, state } => {
                if state.is_cancelled() {
                    return;
                }
                match (self.on_method_call)(ctx, call) {
                    Some(invocation) => state.attach_provider_invocation(invocation),
                    None => state.complete(MethodResult::Failed(ConnectorError::RequestRejected)),
                }
            }
            ServerMessage::SubscriptionChange { id, state } => {
                (self.on_event_subscription_change)(ctx, id, state)
            }
            ServerMessage::UpdateRequest { id } => (self.on_event_update_request)(ctx, id),
        }
    }
}

pub(crate) enum ServerMessage {
    MethodCall {
        call: MethodCall,
        state: Arc<CallState>,
    },
    SubscriptionChange {
        id: EventId,
        state: EventState,
    },
    UpdateRequest {
        id: EventId,
    },
}

struct Connection {
    client: Weak<ClientShared>,
    sender: DispatchSender<ClientMessage>,
    credentials: PosixCredentials,
    allocate: Option<EventPayloadAllocateFn>,
}

#[derive(Default)]
struct EventSlot {
    subscribers: BTreeMap<u64, EventMode>,
    requesters: BTreeSet<u64>,
    last_value: Option<Payload>,
}

#[derive(Default)]
struct ServerState {
    dispatcher: Option<DispatchSender<ServerMessage>>,
    connections: BTreeMap<u64, Connection>,
    events: Vec<EventSlot>,
}

impl ServerState {
    fn notify(&self, message: ServerMessage) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.send(message);
        }
    }

    fn send_to(&self, connection: u64, message: ClientMessage) {
        if let Some(conn) = self.connections.get(&connection) {
            conn.sender.send(message);
        }
    }
}

pub(crate) struct ServerShared {
    pub id: u64,
    configuration: ServerServiceInterfaceConfiguration,
    instance: ServiceInstance,
    credentials: PosixCredentials,
    allocate: Option<MethodPayloadAllocateFn>,
    state: Mutex<ServerState>,
}

impl ServerShared {
    fn new(
        id: u64,
        configuration: ServerServiceInterfaceConfiguration,
        instance: ServiceInstance,
        credentials: PosixCredentials,
        allocate: Option<MethodPayloadAllocateFn>,
    ) -> Self {
        Self {
            id,
            configuration,
            instance,
            credentials,
            allocate,
            state: Mutex::new(ServerState::default()),
        }
    }

    pub fn interface(&self) -> &ServiceInterface {
        self.configuration.interface()
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn credentials(&self) -> PosixCredentials {
        self.credentials
    }

    pub fn allocate_method_payload(&self, id: MethodId) -> Option<PayloadMut> {
        self.allocate.as_ref().and_then(|allocate| allocate(id))
    }

    pub fn start(&self, dispatcher: DispatchSender<ServerMessage>) {
        let mut state = self.state.lock();
        state.dispatcher = Some(dispatcher);
        state.events = (0..self.configuration.num_events())
            .map(|_| EventSlot::default())
            .collect();
    }

    /// Stop accepting traffic and report unavailability to bound clients.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.dispatcher = None;
        state.events.clear();
        let connections = std::mem::take(&mut state.connections);
        for (connection, conn) in connections {
            if let Some(client) = conn.client.upgrade() {
                client.unbind(connection);
            }
        }
    }

    /// Bind a client to this server. Fails if the server is not enabled or
    /// the client is closing.
    pub fn connect(self: &Arc<Self>, client: &Arc<ClientShared>) -> bool {
        let mut state = self.state.lock();
        if state.dispatcher.is_none() {
            return false;
        }
        let connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        if !client.bind(self, connection, self.configuration.clone()) {
            return false;
        }
        state.connections.insert(
            connection,
            Connection {
                client: Arc::downgrade(client),
                sender: client.sender().clone(),
                credentials: client.credentials(),
                allocate: client.event_allocator(),
            },
        );
        tracing::debug!(
            server = self.id,
            client = client.id,
            connection,
            instance = %self.instance,
            "client bound"
        );
        true
    }

    pub fn disconnect(&self, connection: u64) {
        let mut state = self.state.lock();
        if state.connections.remove(&connection).is_none() {
            return;
        }
        let mut released = Vec::new();
        for (id, slot) in state.events.iter_mut().enumerate() {
            slot.requesters.remove(&connection);
            if slot.subscribers.remove(&connection).is_some() && slot.subscribers.is_empty() {
                released.push(id as EventId);
            }
        }
        for id in released {
            state.notify(ServerMessage::SubscriptionChange {
                id,
                state: EventState::Unsubscribed,
            });
        }
    }

    pub fn subscribe(&self, connection: u64, id: EventId, mode: EventMode) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&connection) {
            return Err(ConnectorError::ServiceNotAvailable.into());
        }
        let slot = slot_mut(&mut state.events, id)?;
        let first = slot.subscribers.is_empty();
        slot.subscribers.insert(connection, mode);

        let initial_value = match mode {
            EventMode::UpdateAndInitialValue => slot.last_value.clone(),
            EventMode::Update => None,
        };
        let request_update = mode == EventMode::UpdateAndInitialValue
            && initial_value.is_none()
            && slot.requesters.is_empty();
        if mode == EventMode::UpdateAndInitialValue && initial_value.is_none() {
            slot.requesters.insert(connection);
        }

        if first {
            state.notify(ServerMessage::SubscriptionChange {
                id,
                state: EventState::Subscribed,
            });
        }
        if let Some(payload) = initial_value {
            state.send_to(
                connection,
                ClientMessage::RequestedEventUpdate {
                    connection,
                    id,
                    payload,
                },
            );
        }
        if request_update {
            state.notify(ServerMessage::UpdateRequest { id });
        }
        Ok(())
    }

    pub fn unsubscribe(&self, connection: u64, id: EventId) {
        let mut state = self.state.lock();
        let Ok(slot) = slot_mut(&mut state.events, id) else {
            return;
        };
        slot.requesters.remove(&connection);
        if slot.subscribers.remove(&connection).is_some() && slot.subscribers.is_empty() {
            state.notify(ServerMessage::SubscriptionChange {
                id,
                state: EventState::Unsubscribed,
            });
        }
    }

    pub fn request_update(&self, connection: u64, id: EventId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&connection) {
            return Err(ConnectorError::ServiceNotAvailable.into());
        }
        let slot = slot_mut(&mut state.events, id)?;
        let first = slot.requesters.is_empty();
        slot.requesters.insert(connection);
        if first {
            state.notify(ServerMessage::UpdateRequest { id });
        }
        Ok(())
    }

    pub fn call(
        &self,
        connection: u64,
        method_id: MethodId,
        payload: Payload,
        call: Arc<CallState>,
    ) -> Result<()> {
        if method_id >= self.configuration.num_methods() {
            return Err(ConnectorError::IdOutOfRange.into());
        }
        let state = self.state.lock();
        let (Some(conn), Some(dispatcher)) = (state.connections.get(&connection), &state.dispatcher)
        else {
            return Err(ConnectorError::ServiceNotAvailable.into());
        };
        let message = ServerMessage::MethodCall {
            call: MethodCall {
                method_id,
                payload,
                reply: MethodReply::new(call.clone()),
                credentials: conn.credentials,
            },
            state: call,
        };
        if !dispatcher.send(message) {
            return Err(ConnectorError::ServiceNotAvailable.into());
        }
        Ok(())
    }

    fn check_event(&self, id: EventId) -> Result<()> {
        if id >= self.configuration.num_events() {
            return Err(ServerConnectorError::IdOutOfRange.into());
        }
        Ok(())
    }

    fn update_event(&self, id: EventId, payload: Payload) -> Result<()> {
        self.check_event(id)?;
        let mut state = self.state.lock();
        let Some(slot) = state.events.get_mut(id as usize) else {
            return Ok(());
        };
        slot.last_value = Some(payload.clone());
        let subscribers: Vec<u64> = slot.subscribers.keys().copied().collect();
        let waiting: Vec<u64> = std::mem::take(&mut slot.requesters)
            .into_iter()
            .filter(|connection| !slot.subscribers.contains_key(connection))
            .collect();

        for connection in subscribers {
            state.send_to(
                connection,
                ClientMessage::EventUpdate {
                    connection,
                    id,
                    payload: payload.clone(),
                },
            );
        }
        for connection in waiting {
            state.send_to(
                connection,
                ClientMessage::RequestedEventUpdate {
                    connection,
                    id,
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }

    fn update_requested_event(&self, id: EventId, payload: Payload) -> Result<()> {
        self.check_event(id)?;
        let mut state = self.state.lock();
        let Some(slot) = state.events.get_mut(id as usize) else {
            return Ok(());
        };
        slot.last_value = Some(payload.clone());
        let waiting = std::mem::take(&mut slot.requesters);
        for connection in waiting {
            state.send_to(
                connection,
                ClientMessage::RequestedEventUpdate {
                    connection,
                    id,
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }

    fn set_event_subscription_state(&self, id: EventId, event_state: EventState) -> Result<()> {
        self.check_event(id)?;
        let state = self.state.lock();
        let Some(slot) = state.events.get(id as usize) else {
            return Ok(());
        };
        for &connection in slot.subscribers.keys() {
            state.send_to(
                connection,
                ClientMessage::SubscriptionState {
                    connection,
                    id,
                    state: event_state,
                },
            );
        }
        Ok(())
    }

    fn get_event_mode(&self, id: EventId) -> Result<EventMode> {
        self.check_event(id)?;
        let state = self.state.lock();
        let with_initial = state.events.get(id as usize).is_some_and(|slot| {
            slot.subscribers
                .values()
                .any(|mode| *mode == EventMode::UpdateAndInitialValue)
        });
        Ok(if with_initial {
            EventMode::UpdateAndInitialValue
        } else {
            EventMode::Update
        })
    }

    fn allocate_event_payload(&self, id: EventId) -> Result<Option<PayloadMut>> {
        self.check_event(id)?;
        let allocate = {
            let state = self.state.lock();
            state.events.get(id as usize).and_then(|slot| {
                if slot.subscribers.len() != 1 {
                    return None;
                }
                let connection = slot.subscribers.keys().next()?;
                state.connections.get(connection)?.allocate.clone()
            })
        };
        Ok(allocate.and_then(|allocate| allocate(id)))
    }

    fn subscriber_count(&self, id: EventId) -> usize {
        self.state
            .lock()
            .events
            .get(id as usize)
            .map_or(0, |slot| slot.subscribers.len())
    }
}

fn slot_mut(events: &mut [EventSlot], id: EventId) -> Result<&mut EventSlot> {
    events
        .get_mut(id as usize)
        .ok_or_else(|| ConnectorError::IdOutOfRange.into())
}

/// Operations of an enabled server connector.
///
/// Callbacks receive a `&ServerContext`; [`EnabledServerConnector`]
/// dereferences to one.
pub struct ServerContext {
    shared: Arc<ServerShared>,
}

impl ServerContext {
    /// Publish a new value to every subscriber. Clients waiting on a
    /// requested update that are not subscribed receive it as that update.
    pub fn update_event(&self, id: EventId, payload: Payload) -> Result<()> {
        self.shared.update_event(id, payload)
    }

    /// Answer pending update requests for `id`.
    pub fn update_requested_event(&self, id: EventId, payload: Payload) -> Result<()> {
        self.shared.update_requested_event(id, payload)
    }

    /// Tell subscribed clients about a change of the subscription state,
    /// e.g. a remote backend attaching or detaching.
    pub fn set_event_subscription_state(&self, id: EventId, state: EventState) -> Result<()> {
        self.shared.set_event_subscription_state(id, state)
    }

    pub fn get_event_mode(&self, id: EventId) -> Result<EventMode> {
        self.shared.get_event_mode(id)
    }

    /// Ask the single subscriber of `id` for an update buffer. Returns
    /// `None` when there is not exactly one subscriber or it has no allocator.
    pub fn allocate_event_payload(&self, id: EventId) -> Result<Option<PayloadMut>> {
        self.shared.allocate_event_payload(id)
    }

    pub fn subscriber_count(&self, id: EventId) -> usize {
        self.shared.subscriber_count(id)
    }

    pub fn configuration(&self) -> &ServerServiceInterfaceConfiguration {
        &self.shared.configuration
    }

    pub fn service_instance(&self) -> &ServiceInstance {
        &self.shared.instance
    }
}

/// Releases the `(interface, instance)` reservation when dropped.
pub(crate) struct Reservation {
    pub runtime: Arc<RuntimeInner>,
    pub interface: ServiceInterface,
    pub instance: ServiceInstance,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.runtime.release(&self.interface, &self.instance);
    }
}

struct ServerCore {
    shared: Arc<ServerShared>,
    handlers: Arc<Mutex<ServerHandlers>>,
    reservation: Reservation,
}

/// A server connector that is not advertised.
pub struct DisabledServerConnector {
    core: ServerCore,
}

impl DisabledServerConnector {
    pub(crate) fn new(
        id: u64,
        configuration: ServerServiceInterfaceConfiguration,
        instance: ServiceInstance,
        credentials: PosixCredentials,
        handlers: ServerHandlers,
        allocate: Option<MethodPayloadAllocateFn>,
        reservation: Reservation,
    ) -> Self {
        let shared = Arc::new(ServerShared::new(
            id,
            configuration,
            instance,
            credentials,
            allocate,
        ));
        Self {
            core: ServerCore {
                shared,
                handlers: Arc::new(Mutex::new(handlers)),
                reservation,
            },
        }
    }

    /// Advertise the service and bind waiting clients.
    pub fn enable(self) -> EnabledServerConnector {
        let core = self.core;
        let runtime = core.reservation.runtime.clone();
        let shared = core.shared.clone();
        let handlers = core.handlers.clone();
        let ctx = ServerContext {
            shared: shared.clone(),
        };

        let (sender, queue) = dispatch::queue();
        let dispatcher = queue.spawn(
            format!("{}-server-{}", runtime.config().name, shared.id),
            runtime.config().slow_callback_threshold,
            move |message| handlers.lock().handle(&ctx, message),
        );
        shared.start(sender);
        runtime.register_server(&shared);
        tracing::debug!(
            server = shared.id,
            interface = %shared.interface(),
            instance = %shared.instance(),
            "server connector enabled"
        );

        EnabledServerConnector {
            context: ServerContext { shared },
            activation: Activation {
                runtime,
                shared: core.shared.clone(),
                dispatcher: Some(dispatcher),
            },
            core,
        }
    }

    pub fn configuration(&self) -> &ServerServiceInterfaceConfiguration {
        &self.core.shared.configuration
    }

    pub fn service_instance(&self) -> &ServiceInstance {
        &self.core.shared.instance
    }
}

impl fmt::Debug for DisabledServerConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisabledServerConnector")
            .field("interface", self.core.shared.interface())
            .field("instance", self.core.shared.instance())
            .finish()
    }
}

/// Undoes an enable when dropped: withdraws the service, unbinds clients,
/// and waits for a running callback.
struct Activation {
    runtime: Arc<RuntimeInner>,
    shared: Arc<ServerShared>,
    dispatcher: Option<Dispatcher<ServerMessage>>,
}

impl Drop for Activation {
    fn drop(&mut self) {
        self.runtime.unregister_server(&self.shared);
        drop(self.dispatcher.take());
        tracing::debug!(
            server = self.shared.id,
            instance = %self.shared.instance(),
            "server connector disabled"
        );
    }
}

/// An advertised server connector.
pub struct EnabledServerConnector {
    context: ServerContext,
    activation: Activation,
    core: ServerCore,
}

impl EnabledServerConnector {
    /// Withdraw the service. Bound clients observe
    /// [`crate::ServiceState::NotAvailable`] and lose their subscriptions.
    pub fn disable(self) -> DisabledServerConnector {
        let EnabledServerConnector {
            context,
            activation,
            core,
        } = self;
        drop(activation);
        drop(context);
        DisabledServerConnector { core }
    }
}

impl Deref for EnabledServerConnector {
    type Target = ServerContext;

    fn deref(&self) -> &ServerContext {
        &self.context
    }
}

impl fmt::Debug for EnabledServerConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnabledServerConnector")
            .field("interface", self.core.shared.interface())
            .field("instance", self.core.shared.instance())
            .finish()
    }
}
