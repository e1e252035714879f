//! Consumer side of a service instance.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use svcom_payload::{Payload, PayloadMut};

use crate::credentials::PosixCredentials;
use crate::dispatch::{DispatchSender, Dispatcher};
use crate::error::{ConnectorError, ConstructionError, Result};
use crate::event::{Event, EventId, EventMode, EventState};
use crate::method::{CallState, MethodId, MethodInvocation, MethodResult};
use crate::runtime::{RequestKey, RuntimeInner};
use crate::server::ServerShared;
use crate::service::{
    ServerServiceInterfaceConfiguration, ServiceInstance, ServiceInterface,
    ServiceInterfaceConfiguration,
};

/// Availability of the service a client is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceState {
    NotAvailable,
    Available,
}

type ServiceStateFn =
    Box<dyn FnMut(&ClientContext, ServiceState, &ServerServiceInterfaceConfiguration) + Send>;
type EventUpdateFn = Box<dyn FnMut(&ClientContext, EventId, Payload) + Send>;
type SubscriptionStateFn = Box<dyn FnMut(&ClientContext, EventId, EventState) + Send>;

/// Lets a consumer provide the buffer for an expected event update.
pub type EventPayloadAllocateFn = Arc<dyn Fn(EventId) -> Option<PayloadMut> + Send + Sync>;

/// Callbacks of a client connector.
///
/// `on_service_state_change`, `on_event_update` and
/// `on_requested_event_update` are required. All callbacks of one connector
/// run on its dispatcher thread, one at a time.
#[derive(Default)]
pub struct ClientCallbacks {
    on_service_state_change: Option<ServiceStateFn>,
    on_event_update: Option<EventUpdateFn>,
    on_requested_event_update: Option<EventUpdateFn>,
    on_event_subscription_state_change: Option<SubscriptionStateFn>,
    on_event_payload_allocate: Option<EventPayloadAllocateFn>,
}

impl ClientCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the service becomes available or goes away. The initial
    /// not-available state is not reported.
    pub fn on_service_state_change<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ClientContext, ServiceState, &ServerServiceInterfaceConfiguration)
            + Send
            + 'static,
    {
        self.on_service_state_change = Some(Box::new(f));
        self
    }

    /// Called for every update of a subscribed event.
    pub fn on_event_update<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ClientContext, EventId, Payload) + Send + 'static,
    {
        self.on_event_update = Some(Box::new(f));
        self
    }

    /// Called with values answering [`ClientContext::request_event_update`]
    /// and with initial values.
    pub fn on_requested_event_update<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ClientContext, EventId, Payload) + Send + 'static,
    {
        self.on_requested_event_update = Some(Box::new(f));
        self
    }

    pub fn on_event_subscription_state_change<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ClientContext, EventId, EventState) + Send + 'static,
    {
        self.on_event_subscription_state_change = Some(Box::new(f));
        self
    }

    /// Runs on the publisher's thread, not on the dispatcher.
    pub fn on_event_payload_allocate<F>(mut self, f: F) -> Self
    where
        F: Fn(EventId) -> Option<PayloadMut> + Send + Sync + 'static,
    {
        self.on_event_payload_allocate = Some(Arc::new(f));
        self
    }

    pub(crate) fn into_handlers(self) -> Result<(ClientHandlers, Option<EventPayloadAllocateFn>)> {
        let (
            Some(on_service_state_change),
            Some(on_event_update),
            Some(on_requested_event_update),
        ) = (
            self.on_service_state_change,
            self.on_event_update,
            self.on_requested_event_update,
        )
        else {
            return Err(ConstructionError::CallbackMissing.into());
        };
        let handlers = ClientHandlers {
            on_service_state_change,
            on_event_update,
            on_requested_event_update,
            on_event_subscription_state_change: self.on_event_subscription_state_change,
        };
        Ok((handlers, self.on_event_payload_allocate))
    }
}

impl fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field(
                "on_service_state_change",
                &self.on_service_state_change.is_some(),
            )
            .field("on_event_update", &self.on_event_update.is_some())
            .field(
                "on_requested_event_update",
                &self.on_requested_event_update.is_some(),
            )
            .finish_non_exhaustive()
    }
}

pub(crate) struct ClientHandlers {
    on_service_state_change: ServiceStateFn,
    on_event_update: EventUpdateFn,
    on_requested_event_update: EventUpdateFn,
    on_event_subscription_state_change: Option<SubscriptionStateFn>,
}

impl ClientHandlers {
    pub(crate) fn handle(&mut self, ctx: &ClientContext, message: ClientMessage) {
        match message {
            ClientMessage::ServiceState {
                state,
                configuration,
            } => (self.on_service_state_change)(ctx, state, &configuration),
            ClientMessage::EventUpdate {
                connection,
                id,
                payload,
            } => {
                if ctx.shared.is_subscribed(connection, id) {
                    (self.on_event_update)(ctx, id, payload);
                }
            }
            ClientMessage::RequestedEventUpdate {
                connection,
                id,
                payload,
            } => {
                if ctx.shared.is_bound_to(connection) {
                    (self.on_requested_event_update)(ctx, id, payload);
                }
            }
            ClientMessage::SubscriptionState {
                connection,
                id,
                state,
            } => {
                if ctx.shared.apply_subscription_state(connection, id, state) {
                    if let Some(callback) = self.on_event_subscription_state_change.as_mut() {
                        callback(ctx, id, state);
                    }
                }
            }
            ClientMessage::MethodReply(call) => call.deliver(),
        }
    }
}

/// Messages delivered to a client's dispatcher.
pub(crate) enum ClientMessage {
    ServiceState {
        state: ServiceState,
        configuration: ServerServiceInterfaceConfiguration,
    },
    EventUpdate {
        connection: u64,
        id: EventId,
        payload: Payload,
    },
    RequestedEventUpdate {
        connection: u64,
        id: EventId,
        payload: Payload,
    },
    SubscriptionState {
        connection: u64,
        id: EventId,
        state: EventState,
    },
    MethodReply(Arc<CallState>),
}

pub(crate) struct ServerLink {
    pub server: Arc<ServerShared>,
    pub connection: u64,
    pub configuration: ServerServiceInterfaceConfiguration,
}

#[derive(Default)]
struct ClientState {
    closed: bool,
    link: Option<ServerLink>,
    events: BTreeMap<EventId, Event>,
    calls: Vec<Weak<CallState>>,
}

pub(crate) struct ClientShared {
    pub id: u64,
    configuration: ServiceInterfaceConfiguration,
    instance: ServiceInstance,
    credentials: PosixCredentials,
    allocate: Option<EventPayloadAllocateFn>,
    sender: DispatchSender<ClientMessage>,
    state: Mutex<ClientState>,
}

impl ClientShared {
    pub fn new(
        id: u64,
        configuration: ServiceInterfaceConfiguration,
        instance: ServiceInstance,
        credentials: PosixCredentials,
        allocate: Option<EventPayloadAllocateFn>,
        sender: DispatchSender<ClientMessage>,
    ) -> Self {
        Self {
            id,
            configuration,
            instance,
            credentials,
            allocate,
            sender,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.configuration.interface
    }

    pub fn configuration(&self) -> &ServiceInterfaceConfiguration {
        &self.configuration
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn credentials(&self) -> PosixCredentials {
        self.credentials
    }

    pub fn event_allocator(&self) -> Option<EventPayloadAllocateFn> {
        self.allocate.clone()
    }

    pub fn sender(&self) -> &DispatchSender<ClientMessage> {
        &self.sender
    }

    /// Attach to a server connection and report availability.
    pub fn bind(
        &self,
        server: &Arc<ServerShared>,
        connection: u64,
        configuration: ServerServiceInterfaceConfiguration,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.link.is_some() {
            return false;
        }
        state.events.clear();
        state.link = Some(ServerLink {
            server: server.clone(),
            connection,
            configuration: configuration.clone(),
        });
        self.sender.send(ClientMessage::ServiceState {
            state: ServiceState::Available,
            configuration,
        });
        true
    }

    /// Detach from `connection`; subscriptions are lost.
    pub fn unbind(&self, connection: u64) {
        let mut state = self.state.lock();
        if !state
            .link
            .as_ref()
            .is_some_and(|link| link.connection == connection)
        {
            return;
        }
        state.link = None;
        state.events.clear();
        self.sender.send(ClientMessage::ServiceState {
            state: ServiceState::NotAvailable,
            configuration: ServerServiceInterfaceConfiguration::invalid(),
        });
    }

    fn close(&self) -> (Option<ServerLink>, Vec<Arc<CallState>>) {
        let mut state = self.state.lock();
        state.closed = true;
        state.events.clear();
        let calls = state.calls.drain(..).filter_map(|c| c.upgrade()).collect();
        (state.link.take(), calls)
    }

    fn link(&self) -> Result<(Arc<ServerShared>, u64)> {
        self.state
            .lock()
            .link
            .as_ref()
            .map(|link| (link.server.clone(), link.connection))
            .ok_or_else(|| ConnectorError::ServiceNotAvailable.into())
    }

    fn is_bound_to(&self, connection: u64) -> bool {
        self.state
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| link.connection == connection)
    }

    fn is_subscribed(&self, connection: u64, id: EventId) -> bool {
        let state = self.state.lock();
        state
            .link
            .as_ref()
            .is_some_and(|link| link.connection == connection)
            && state.events.contains_key(&id)
    }

    fn apply_subscription_state(
        &self,
        connection: u64,
        id: EventId,
        new_state: EventState,
    ) -> bool {
        let mut state = self.state.lock();
        if !state
            .link
            .as_ref()
            .is_some_and(|link| link.connection == connection)
        {
            return false;
        }
        match state.events.get_mut(&id) {
            Some(event) => {
                event.state = new_state;
                true
            }
            None => false,
        }
    }

    fn check_event(&self, id: EventId) -> Result<()> {
        if id >= self.configuration.num_events {
            return Err(ConnectorError::IdOutOfRange.into());
        }
        Ok(())
    }

    fn check_method(&self, id: MethodId) -> Result<()> {
        if id >= self.configuration.num_methods {
            return Err(ConnectorError::IdOutOfRange.into());
        }
        Ok(())
    }
}

/// Operations on a client connector.
///
/// Callbacks receive a `&ClientContext`; [`ClientConnector`] dereferences
/// to one.
pub struct ClientContext {
    pub(crate) shared: Arc<ClientShared>,
}

impl ClientContext {
    /// Subscribe to an event. Updates are delivered via `on_event_update`;
    /// with [`EventMode::UpdateAndInitialValue`] the last known value is
    /// delivered first via `on_requested_event_update`.
    pub fn subscribe_event(&self, id: EventId, mode: EventMode) -> Result<Event> {
        self.shared.check_event(id)?;
        let event = Event::new(id, mode, EventState::Subscribed);
        let (server, connection) = {
            let mut state = self.shared.state.lock();
            let link = state
                .link
                .as_ref()
                .ok_or(ConnectorError::ServiceNotAvailable)?;
            let bound = (link.server.clone(), link.connection);
            state.events.insert(id, event);
            bound
        };

        if let Err(err) = server.subscribe(connection, id, mode) {
            let mut state = self.shared.state.lock();
            if state
                .link
                .as_ref()
                .is_some_and(|link| link.connection == connection)
            {
                state.events.remove(&id);
            }
            return Err(err);
        }
        Ok(event)
    }

    pub fn unsubscribe_event(&self, id: EventId) -> Result<()> {
        self.shared.check_event(id)?;
        let (server, connection) = {
            let mut state = self.shared.state.lock();
            let link = state
                .link
                .as_ref()
                .ok_or(ConnectorError::ServiceNotAvailable)?;
            let bound = (link.server.clone(), link.connection);
            state.events.remove(&id);
            bound
        };
        server.unsubscribe(connection, id);
        Ok(())
    }

    /// Ask the provider for a fresh value; it arrives via
    /// `on_requested_event_update`.
    pub fn request_event_update(&self, id: EventId) -> Result<()> {
        self.shared.check_event(id)?;
        let (server, connection) = self.shared.link()?;
        server.request_update(connection, id)
    }

    /// Call a method. `on_reply` runs exactly once on the dispatcher, unless
    /// the returned invocation is dropped first.
    pub fn call_method<F>(
        &self,
        id: MethodId,
        payload: Payload,
        on_reply: F,
    ) -> Result<MethodInvocation>
    where
        F: FnOnce(MethodResult) + Send + 'static,
    {
        self.shared.check_method(id)?;
        let (server, connection) = self.shared.link()?;
        let call = CallState::new(Box::new(on_reply), self.shared.sender.clone());
        {
            let mut state = self.shared.state.lock();
            state.calls.retain(|c| c.strong_count() > 0);
            state.calls.push(Arc::downgrade(&call));
        }
        server.call(connection, id, payload, call.clone())?;
        Ok(MethodInvocation::for_call(call))
    }

    /// Ask the bound provider for a request buffer.
    pub fn allocate_method_payload(&self, id: MethodId) -> Result<Option<PayloadMut>> {
        self.shared.check_method(id)?;
        let (server, _) = self.shared.link()?;
        Ok(server.allocate_method_payload(id))
    }

    /// Credentials of the bound provider.
    pub fn get_peer_credentials(&self) -> Result<PosixCredentials> {
        let (server, _) = self.shared.link()?;
        Ok(server.credentials())
    }

    pub fn configuration(&self) -> &ServiceInterfaceConfiguration {
        self.shared.configuration()
    }

    pub fn service_instance(&self) -> &ServiceInstance {
        self.shared.instance()
    }

    /// Configuration of the bound provider, if any.
    pub fn server_configuration(&self) -> Option<ServerServiceInterfaceConfiguration> {
        self.shared
            .state
            .lock()
            .link
            .as_ref()
            .map(|link| link.configuration.clone())
    }

    pub fn is_service_available(&self) -> bool {
        self.shared.state.lock().link.is_some()
    }

    /// Snapshot of the current subscriptions.
    pub fn get_events(&self) -> Vec<Event> {
        self.shared.state.lock().events.values().copied().collect()
    }
}

#[cfg(feature = "async")]
mod pending {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::sync::oneshot;

    use super::*;

    /// Future of a method reply. Dropping it cancels the call.
    pub struct PendingReply {
        rx: oneshot::Receiver<MethodResult>,
        _invocation: MethodInvocation,
    }

    impl Future for PendingReply {
        type Output = MethodResult;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            Pin::new(&mut self.get_mut().rx).poll(cx).map(|result| {
                result.unwrap_or(MethodResult::Failed(ConnectorError::ServiceNotAvailable))
            })
        }
    }

    impl ClientContext {
        /// Call a method and await the reply.
        pub fn call_method_async(&self, id: MethodId, payload: Payload) -> Result<PendingReply> {
            let (tx, rx) = oneshot::channel();
            let invocation = self.call_method(id, payload, move |result| {
                let _ = tx.send(result);
            })?;
            Ok(PendingReply {
                rx,
                _invocation: invocation,
            })
        }
    }
}

#[cfg(feature = "async")]
pub use pending::PendingReply;

/// Owning handle of a client connection to one service instance.
///
/// Dropping it unsubscribes, abandons outstanding method calls, and waits
/// for a running callback to return.
pub struct ClientConnector {
    context: ClientContext,
    runtime: Arc<RuntimeInner>,
    request: Option<RequestKey>,
    dispatcher: Option<Dispatcher<ClientMessage>>,
}

impl ClientConnector {
    pub(crate) fn new(
        context: ClientContext,
        runtime: Arc<RuntimeInner>,
        request: Option<RequestKey>,
        dispatcher: Dispatcher<ClientMessage>,
    ) -> Self {
        Self {
            context,
            runtime,
            request,
            dispatcher: Some(dispatcher),
        }
    }
}

impl Deref for ClientConnector {
    type Target = ClientContext;

    fn deref(&self) -> &ClientContext {
        &self.context
    }
}

impl Drop for ClientConnector {
    fn drop(&mut self) {
        drop(self.dispatcher.take());
        let shared = &self.context.shared;
        let (link, calls) = shared.close();
        if let Some(link) = link {
            link.server.disconnect(link.connection);
        }
        for call in calls {
            call.abandon();
        }
        self.runtime.unregister_client(shared, self.request.take());
        tracing::debug!(
            client = shared.id,
            interface = %shared.interface(),
            instance = %shared.instance(),
            "client connector dropped"
        );
    }
}

impl fmt::Debug for ClientConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnector")
            .field("interface", self.context.shared.interface())
            .field("instance", self.context.shared.instance())
            .field("available", &self.is_service_available())
            .finish()
    }
}
