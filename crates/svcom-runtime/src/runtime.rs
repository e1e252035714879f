//! The service directory.
//!
//! [`Runtime`] creates connectors and matches clients to servers. It keeps:
//!
//! - reservations of `(interface, instance)` pairs held by server connectors,
//! - per instance, the enabled servers and the clients waiting or bound,
//! - find subscriptions and their forwarding to registered bridges,
//! - service requests issued to bridges on behalf of unbound clients.
//!
//! Bridge functions and connector binding always run outside the directory
//! lock; their results are merged back afterwards and discarded if the
//! subscription or bridge went away in between.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bridge::{
    BridgeIdentity, FindResultChangeCallback, RequestServiceFn, ServiceBridgeRegistration,
    ServiceRequest, SubscribeFindServiceFn,
};
use crate::client::{ClientCallbacks, ClientConnector, ClientContext, ClientShared};
use crate::config::RuntimeConfig;
use crate::credentials::PosixCredentials;
use crate::discovery::{
    self, AggregateHandler, ChangeHandler, DiscoveryMessage, FindHandler, FindResultStatus,
    FindSlot, FindSubscription,
};
use crate::dispatch::{self, CallbackCell, Dispatcher};
use crate::error::{ConstructionError, Result};
use crate::server::{DisabledServerConnector, Reservation, ServerCallbacks, ServerShared};
use crate::service::{
    ServerServiceInterfaceConfiguration, ServiceIdentifier, ServiceInstance, ServiceInterface,
    ServiceInterfaceConfiguration,
};

/// Key of an outstanding service request: what the clients expect and where.
pub(crate) type RequestKey = (ServiceInterfaceConfiguration, ServiceInstance);

/// Servers and clients are grouped by interface id and major version.
type RecordKey = (String, u16);

/// A find subscription as forwarded to bridges.
type FindKey = (ServiceInterface, Option<ServiceInstance>);

fn record_key(interface: &ServiceInterface) -> RecordKey {
    (interface.id.clone(), interface.version.major)
}

#[derive(Default)]
struct Record {
    servers: Vec<Arc<ServerShared>>,
    clients: BTreeMap<u64, Weak<ClientShared>>,
}

impl Record {
    fn is_empty(&self) -> bool {
        self.servers.is_empty() && self.clients.is_empty()
    }

    fn server_for(&self, client: &ClientShared) -> Option<Arc<ServerShared>> {
        self.servers
            .iter()
            .find(|server| client.interface().is_compatible_with(server.interface()))
            .cloned()
    }
}

struct FindEntry {
    interface: Option<ServiceInterface>,
    instance: Option<ServiceInstance>,
    bridge: Option<BridgeIdentity>,
    slot: Arc<FindSlot>,
}

impl FindEntry {
    fn matches(&self, interface: &ServiceInterface, instance: &ServiceInstance) -> bool {
        self.interface
            .as_ref()
            .is_none_or(|wanted| wanted.is_compatible_with(interface))
            && self.instance.as_ref().is_none_or(|wanted| wanted == instance)
    }

    /// Services reported by `source` reach only subscriptions that name an
    /// interface and do not belong to `source` itself.
    fn accepts_from(&self, source: Option<BridgeIdentity>) -> bool {
        match source {
            None => true,
            Some(source) => self.interface.is_some() && self.bridge != Some(source),
        }
    }
}

struct BridgeEntry {
    identity: BridgeIdentity,
    subscribe_find_service: SubscribeFindServiceFn,
    request_service: RequestServiceFn,
    provided: BTreeSet<(ServiceInterface, ServiceInstance)>,
}

#[derive(Default)]
struct BridgeFind {
    /// Find subscription id to the bridge that owns it, if any.
    subscribers: BTreeMap<u64, Option<BridgeIdentity>>,
    /// Bridge id to the handle the bridge returned.
    handles: BTreeMap<u64, FindSubscription>,
}

impl BridgeFind {
    fn wants(&self, identity: BridgeIdentity) -> bool {
        self.subscribers.values().any(|owner| *owner != Some(identity))
    }
}

#[derive(Default)]
struct ActiveRequest {
    clients: usize,
    handles: BTreeMap<u64, ServiceRequest>,
}

#[derive(Default)]
struct Directory {
    reserved: BTreeSet<ServiceIdentifier>,
    records: BTreeMap<RecordKey, BTreeMap<ServiceInstance, Record>>,
    finds: BTreeMap<u64, FindEntry>,
    bridges: BTreeMap<u64, BridgeEntry>,
    bridge_finds: BTreeMap<FindKey, BridgeFind>,
    requests: BTreeMap<RequestKey, ActiveRequest>,
}

impl Directory {
    fn record_mut(
        &mut self,
        interface: &ServiceInterface,
        instance: &ServiceInstance,
    ) -> &mut Record {
        self.records
            .entry(record_key(interface))
            .or_default()
            .entry(instance.clone())
            .or_default()
    }

    fn prune_record(&mut self, interface: &ServiceInterface, instance: &ServiceInstance) {
        let key = record_key(interface);
        let Some(instances) = self.records.get_mut(&key) else {
            return;
        };
        if instances.get(instance).is_some_and(Record::is_empty) {
            instances.remove(instance);
        }
        if instances.is_empty() {
            self.records.remove(&key);
        }
    }

    /// Services that `entry` should see when it is created.
    fn known_services(&self, entry: &FindEntry) -> BTreeSet<(ServiceInterface, ServiceInstance)> {
        let mut known = BTreeSet::new();
        for instances in self.records.values() {
            for (instance, record) in instances {
                for server in &record.servers {
                    if entry.matches(server.interface(), instance) {
                        known.insert((server.interface().clone(), instance.clone()));
                    }
                }
            }
        }
        for bridge in self.bridges.values() {
            if !entry.accepts_from(Some(bridge.identity)) {
                continue;
            }
            for (interface, instance) in &bridge.provided {
                if entry.matches(interface, instance) {
                    known.insert((interface.clone(), instance.clone()));
                }
            }
        }
        known
    }
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    next_id: AtomicU64,
    directory: Mutex<Directory>,
    discovery: Dispatcher<DiscoveryMessage>,
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        let (_, queue) = dispatch::queue();
        let discovery = queue.spawn(
            format!("{}-discovery", config.name),
            config.slow_callback_threshold,
            discovery::deliver,
        );
        Self {
            config,
            next_id: AtomicU64::new(1),
            directory: Mutex::new(Directory::default()),
            discovery,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn notify(
        &self,
        dir: &Directory,
        interface: &ServiceInterface,
        instance: &ServiceInstance,
        status: FindResultStatus,
        source: Option<BridgeIdentity>,
    ) {
        for entry in dir.finds.values() {
            if !entry.accepts_from(source) || !entry.matches(interface, instance) {
                continue;
            }
            self.discovery.send(DiscoveryMessage::Changed {
                slot: entry.slot.clone(),
                interface: interface.clone(),
                instance: instance.clone(),
                status,
            });
        }
    }

    fn bind(&self, server: &Arc<ServerShared>, client: &Arc<ClientShared>) {
        if client.interface().is_compatible_with(server.interface()) {
            server.connect(client);
        } else {
            tracing::error!(
                client = client.id,
                expected = %client.interface(),
                offered = %server.interface(),
                instance = %client.instance(),
                "minor version mismatch; client not bound"
            );
        }
    }

    fn reserve(&self, interface: &ServiceInterface, instance: &ServiceInstance) -> Result<()> {
        let key = ServiceIdentifier {
            interface: interface.clone(),
            instance: instance.clone(),
        };
        if !self.directory.lock().reserved.insert(key) {
            tracing::warn!(%interface, %instance, "server connector already exists");
            return Err(ConstructionError::DuplicateService.into());
        }
        Ok(())
    }

    pub fn release(&self, interface: &ServiceInterface, instance: &ServiceInstance) {
        let key = ServiceIdentifier {
            interface: interface.clone(),
            instance: instance.clone(),
        };
        self.directory.lock().reserved.remove(&key);
    }

    pub fn register_server(&self, server: &Arc<ServerShared>) {
        let waiting: Vec<Arc<ClientShared>> = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let record = dir.record_mut(server.interface(), server.instance());
            record.servers.push(server.clone());
            let waiting = record.clients.values().filter_map(Weak::upgrade).collect();
            self.notify(
                dir,
                server.interface(),
                server.instance(),
                FindResultStatus::Added,
                None,
            );
            waiting
        };
        for client in waiting {
            self.bind(server, &client);
        }
    }

    /// Withdraw `server`, unbind its clients and move them to another
    /// compatible server of the same instance, if one is enabled.
    pub fn unregister_server(&self, server: &Arc<ServerShared>) {
        {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let record = dir.record_mut(server.interface(), server.instance());
            record.servers.retain(|s| !Arc::ptr_eq(s, server));
            dir.prune_record(server.interface(), server.instance());
            self.notify(
                dir,
                server.interface(),
                server.instance(),
                FindResultStatus::Deleted,
                None,
            );
        }
        server.stop();

        let rebinds: Vec<(Arc<ServerShared>, Arc<ClientShared>)> = {
            let dir = self.directory.lock();
            dir.records
                .get(&record_key(server.interface()))
                .and_then(|instances| instances.get(server.instance()))
                .map(|record| {
                    record
                        .clients
                        .values()
                        .filter_map(Weak::upgrade)
                        .filter_map(|client| Some((record.server_for(&client)?, client)))
                        .collect()
                })
                .unwrap_or_default()
        };
        for (other, client) in rebinds {
            self.bind(&other, &client);
        }
    }

    /// Add a client to the directory; returns the key of the service
    /// request issued for it, if no server was available.
    fn register_client(&self, client: &Arc<ClientShared>) -> Option<RequestKey> {
        let (server, request) = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let record = dir.record_mut(client.interface(), client.instance());
            record.clients.insert(client.id, Arc::downgrade(client));
            match record.server_for(client) {
                Some(server) => (Some(server), None),
                None => {
                    let key = (client.configuration().clone(), client.instance().clone());
                    let active = dir.requests.entry(key.clone()).or_default();
                    active.clients += 1;
                    let bridges: Vec<(u64, RequestServiceFn)> = if active.clients == 1 {
                        dir.bridges
                            .iter()
                            .map(|(id, bridge)| (*id, bridge.request_service.clone()))
                            .collect()
                    } else {
                        Vec::new()
                    };
                    (None, Some((key, bridges)))
                }
            }
        };

        if let Some(server) = server {
            self.bind(&server, client);
            return None;
        }
        let (key, bridges) = request?;
        if !bridges.is_empty() {
            tracing::debug!(
                client = client.id,
                interface = %client.interface(),
                instance = %client.instance(),
                bridges = bridges.len(),
                "requesting service from bridges"
            );
        }
        self.forward_request(&key, bridges);
        Some(key)
    }

    pub fn unregister_client(&self, client: &Arc<ClientShared>, request: Option<RequestKey>) {
        let released: Vec<ServiceRequest> = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            if let Some(record) = dir
                .records
                .get_mut(&record_key(client.interface()))
                .and_then(|instances| instances.get_mut(client.instance()))
            {
                record.clients.remove(&client.id);
            }
            dir.prune_record(client.interface(), client.instance());

            let mut released = Vec::new();
            if let Some(key) = request {
                let last = dir.requests.get_mut(&key).is_some_and(|active| {
                    active.clients = active.clients.saturating_sub(1);
                    active.clients == 0
                });
                if last {
                    if let Some(active) = dir.requests.remove(&key) {
                        released.extend(active.handles.into_values());
                    }
                }
            }
            released
        };
        drop(released);
    }

    fn forward_request(&self, key: &RequestKey, bridges: Vec<(u64, RequestServiceFn)>) {
        if bridges.is_empty() {
            return;
        }
        let issued: Vec<(u64, ServiceRequest)> = bridges
            .into_iter()
            .map(|(bridge_id, request_service)| (bridge_id, request_service(&key.0, &key.1)))
            .collect();

        let stale: Vec<ServiceRequest> = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let mut stale = Vec::new();
            for (bridge_id, handle) in issued {
                match dir.requests.get_mut(key) {
                    Some(active)
                        if dir.bridges.contains_key(&bridge_id)
                            && !active.handles.contains_key(&bridge_id) =>
                    {
                        active.handles.insert(bridge_id, handle);
                    }
                    _ => stale.push(handle),
                }
            }
            stale
        };
        drop(stale);
    }

    fn subscribe_find(
        self: &Arc<Self>,
        handler: Box<dyn FindHandler>,
        interface: Option<ServiceInterface>,
        instance: Option<ServiceInstance>,
        bridge: Option<BridgeIdentity>,
    ) -> FindSubscription {
        let id = self.next_id();
        let slot: Arc<FindSlot> = Arc::new(CallbackCell::new(handler));
        let entry = FindEntry {
            interface,
            instance,
            bridge,
            slot: slot.clone(),
        };

        let forward = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            for (interface, instance) in dir.known_services(&entry) {
                self.discovery.send(DiscoveryMessage::Changed {
                    slot: slot.clone(),
                    interface,
                    instance,
                    status: FindResultStatus::Added,
                });
            }
            self.discovery
                .send(DiscoveryMessage::InitialResults { slot: slot.clone() });

            let forward = entry.interface.clone().map(|interface| {
                let key: FindKey = (interface, entry.instance.clone());
                let find = dir.bridge_finds.entry(key.clone()).or_default();
                find.subscribers.insert(id, bridge);
                let bridges: Vec<(u64, SubscribeFindServiceFn)> = dir
                    .bridges
                    .iter()
                    .filter(|(bridge_id, b)| {
                        find.wants(b.identity) && !find.handles.contains_key(*bridge_id)
                    })
                    .map(|(bridge_id, b)| (*bridge_id, b.subscribe_find_service.clone()))
                    .collect();
                (key, bridges)
            });
            dir.finds.insert(id, entry);
            forward
        };

        if let Some((key, bridges)) = forward {
            self.forward_find(&key, bridges);
        }
        FindSubscription::local(self.clone(), id, slot)
    }

    fn forward_find(self: &Arc<Self>, key: &FindKey, bridges: Vec<(u64, SubscribeFindServiceFn)>) {
        if bridges.is_empty() {
            return;
        }
        let issued: Vec<(u64, FindSubscription)> = bridges
            .into_iter()
            .map(|(bridge_id, subscribe)| {
                let callback = self.bridge_callback(bridge_id);
                (bridge_id, subscribe(callback, &key.0, key.1.as_ref()))
            })
            .collect();

        let stale: Vec<FindSubscription> = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let mut stale = Vec::new();
            for (bridge_id, handle) in issued {
                let identity = dir.bridges.get(&bridge_id).map(|b| b.identity);
                match (dir.bridge_finds.get_mut(key), identity) {
                    (Some(find), Some(identity))
                        if find.wants(identity) && !find.handles.contains_key(&bridge_id) =>
                    {
                        find.handles.insert(bridge_id, handle);
                    }
                    _ => stale.push(handle),
                }
            }
            stale
        };
        drop(stale);
    }

    fn bridge_callback(self: &Arc<Self>, bridge_id: u64) -> FindResultChangeCallback {
        let runtime = Arc::downgrade(self);
        Arc::new(
            move |interface: &ServiceInterface,
                  instance: &ServiceInstance,
                  status: FindResultStatus| {
                if let Some(runtime) = runtime.upgrade() {
                    runtime.bridge_reported(bridge_id, interface, instance, status);
                }
            },
        )
    }

    fn bridge_reported(
        &self,
        bridge_id: u64,
        interface: &ServiceInterface,
        instance: &ServiceInstance,
        status: FindResultStatus,
    ) {
        let mut guard = self.directory.lock();
        let dir = &mut *guard;
        let Some(bridge) = dir.bridges.get_mut(&bridge_id) else {
            return;
        };
        let key = (interface.clone(), instance.clone());
        let changed = match status {
            FindResultStatus::Added => bridge.provided.insert(key),
            FindResultStatus::Deleted => bridge.provided.remove(&key),
        };
        if changed {
            let source = bridge.identity;
            self.notify(dir, interface, instance, status, Some(source));
        }
    }

    pub fn remove_find(&self, id: u64) {
        let released: Vec<FindSubscription> = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let Some(entry) = dir.finds.remove(&id) else {
                return;
            };
            let mut released = Vec::new();
            if let Some(interface) = entry.interface {
                let key: FindKey = (interface, entry.instance);
                let mut now_unused = false;
                if let Some(find) = dir.bridge_finds.get_mut(&key) {
                    find.subscribers.remove(&id);
                    now_unused = find.subscribers.is_empty();
                    if !now_unused {
                        let unwanted: Vec<u64> = find
                            .handles
                            .keys()
                            .filter(|bridge_id| {
                                dir.bridges
                                    .get(*bridge_id)
                                    .is_none_or(|bridge| !find.wants(bridge.identity))
                            })
                            .copied()
                            .collect();
                        for bridge_id in unwanted {
                            released.extend(find.handles.remove(&bridge_id));
                        }
                    }
                }
                if now_unused {
                    if let Some(find) = dir.bridge_finds.remove(&key) {
                        released.extend(find.handles.into_values());
                    }
                }
            }
            released
        };
        drop(released);
    }

    fn register_bridge(
        self: &Arc<Self>,
        identity: BridgeIdentity,
        subscribe_find_service: SubscribeFindServiceFn,
        request_service: RequestServiceFn,
    ) -> ServiceBridgeRegistration {
        let id = self.next_id();
        let (finds, requests) = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            dir.bridges.insert(
                id,
                BridgeEntry {
                    identity,
                    subscribe_find_service: subscribe_find_service.clone(),
                    request_service: request_service.clone(),
                    provided: BTreeSet::new(),
                },
            );
            let finds: Vec<FindKey> = dir
                .bridge_finds
                .iter()
                .filter(|(_, find)| find.wants(identity))
                .map(|(key, _)| key.clone())
                .collect();
            let requests: Vec<RequestKey> = dir.requests.keys().cloned().collect();
            (finds, requests)
        };
        tracing::debug!(
            bridge = %identity,
            finds = finds.len(),
            requests = requests.len(),
            "service bridge registered"
        );

        for key in &finds {
            self.forward_find(key, vec![(id, subscribe_find_service.clone())]);
        }
        for key in &requests {
            self.forward_request(key, vec![(id, request_service.clone())]);
        }
        ServiceBridgeRegistration::new(self.clone(), id, identity)
    }

    pub fn remove_bridge(&self, id: u64) {
        let released = {
            let mut guard = self.directory.lock();
            let dir = &mut *guard;
            let Some(bridge) = dir.bridges.remove(&id) else {
                return;
            };
            let finds: Vec<FindSubscription> = dir
                .bridge_finds
                .values_mut()
                .filter_map(|find| find.handles.remove(&id))
                .collect();
            let requests: Vec<ServiceRequest> = dir
                .requests
                .values_mut()
                .filter_map(|active| active.handles.remove(&id))
                .collect();
            for (interface, instance) in &bridge.provided {
                self.notify(
                    dir,
                    interface,
                    instance,
                    FindResultStatus::Deleted,
                    Some(bridge.identity),
                );
            }
            tracing::debug!(bridge = %bridge.identity, "service bridge removed");
            (bridge, finds, requests)
        };
        drop(released);
    }

    fn available_services(&self) -> Vec<(ServiceInterface, ServiceInstance)> {
        let dir = self.directory.lock();
        dir.records
            .values()
            .flat_map(|instances| {
                instances.iter().flat_map(|(instance, record)| {
                    record
                        .servers
                        .iter()
                        .map(move |server| (server.interface().clone(), instance.clone()))
                })
            })
            .collect()
    }
}

/// Entry point: creates connectors, runs discovery, and hosts bridges.
///
/// Cloning is cheap; all clones share one directory.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        tracing::debug!(name = %config.name, "runtime created");
        Self {
            inner: Arc::new(RuntimeInner::new(config)),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Create a client for `instance` using the runtime's credentials.
    pub fn make_client_connector(
        &self,
        configuration: ServiceInterfaceConfiguration,
        instance: ServiceInstance,
        callbacks: ClientCallbacks,
    ) -> Result<ClientConnector> {
        let credentials = self.inner.config().credentials;
        self.make_client_connector_with_credentials(configuration, instance, callbacks, credentials)
    }

    /// Create a client that presents `credentials` to the provider.
    ///
    /// The client binds as soon as a compatible server is enabled. If none
    /// is, registered bridges are asked to provide the service.
    pub fn make_client_connector_with_credentials(
        &self,
        configuration: ServiceInterfaceConfiguration,
        instance: ServiceInstance,
        callbacks: ClientCallbacks,
        credentials: PosixCredentials,
    ) -> Result<ClientConnector> {
        let (mut handlers, allocate) = callbacks.into_handlers()?;
        let id = self.inner.next_id();
        let (sender, queue) = dispatch::queue();
        let shared = Arc::new(ClientShared::new(
            id,
            configuration,
            instance,
            credentials,
            allocate,
            sender,
        ));
        let ctx = ClientContext {
            shared: shared.clone(),
        };
        let dispatcher = queue.spawn(
            format!("{}-client-{id}", self.inner.config().name),
            self.inner.config().slow_callback_threshold,
            move |message| handlers.handle(&ctx, message),
        );
        tracing::debug!(
            client = id,
            interface = %shared.interface(),
            instance = %shared.instance(),
            "client connector created"
        );

        let request = self.inner.register_client(&shared);
        Ok(ClientConnector::new(
            ClientContext { shared },
            self.inner.clone(),
            request,
            dispatcher,
        ))
    }

    /// Create a disabled server for `instance` using the runtime's credentials.
    pub fn make_server_connector(
        &self,
        configuration: impl Into<ServerServiceInterfaceConfiguration>,
        instance: ServiceInstance,
        callbacks: ServerCallbacks,
    ) -> Result<DisabledServerConnector> {
        let credentials = self.inner.config().credentials;
        self.make_server_connector_with_credentials(configuration, instance, callbacks, credentials)
    }

    /// Create a disabled server. Fails with
    /// [`ConstructionError::DuplicateService`] while another connector for
    /// the same interface and instance exists, enabled or not.
    pub fn make_server_connector_with_credentials(
        &self,
        configuration: impl Into<ServerServiceInterfaceConfiguration>,
        instance: ServiceInstance,
        callbacks: ServerCallbacks,
        credentials: PosixCredentials,
    ) -> Result<DisabledServerConnector> {
        let configuration = configuration.into();
        let (handlers, allocate) = callbacks.into_handlers()?;
        let interface = configuration.interface().clone();
        self.inner.reserve(&interface, &instance)?;
        let reservation = Reservation {
            runtime: self.inner.clone(),
            interface,
            instance: instance.clone(),
        };
        let id = self.inner.next_id();
        tracing::debug!(
            server = id,
            interface = %reservation.interface,
            %instance,
            "server connector created"
        );
        Ok(DisabledServerConnector::new(
            id,
            configuration,
            instance,
            credentials,
            handlers,
            allocate,
            reservation,
        ))
    }

    /// Watch the set of instances providing `interface`.
    ///
    /// `callback` receives the full list of matching instances once the
    /// currently known ones were collected and after every change.
    pub fn subscribe_find_service<F>(
        &self,
        callback: F,
        interface: ServiceInterface,
        instance: Option<ServiceInstance>,
    ) -> FindSubscription
    where
        F: FnMut(&[ServiceInstance]) + Send + 'static,
    {
        self.inner.subscribe_find(
            Box::new(AggregateHandler::new(callback)),
            Some(interface),
            instance,
            None,
        )
    }

    /// Watch individual services appearing and disappearing.
    ///
    /// `None` for `interface` matches every interface; such subscriptions
    /// only see local servers. A bridge subscribing on its own behalf
    /// passes its identity so that the subscription is not forwarded back
    /// to it.
    pub fn subscribe_find_service_changes<F>(
        &self,
        callback: F,
        interface: Option<ServiceInterface>,
        instance: Option<ServiceInstance>,
        bridge: Option<BridgeIdentity>,
    ) -> FindSubscription
    where
        F: FnMut(&ServiceInterface, &ServiceInstance, FindResultStatus) + Send + 'static,
    {
        self.inner
            .subscribe_find(Box::new(ChangeHandler(callback)), interface, instance, bridge)
    }

    /// Register a network bridge. Both functions are required.
    pub fn register_service_bridge(
        &self,
        identity: BridgeIdentity,
        subscribe_find_service: Option<SubscribeFindServiceFn>,
        request_service: Option<RequestServiceFn>,
    ) -> Result<ServiceBridgeRegistration> {
        let (Some(subscribe_find_service), Some(request_service)) =
            (subscribe_find_service, request_service)
        else {
            return Err(ConstructionError::CallbackMissing.into());
        };
        Ok(self
            .inner
            .register_bridge(identity, subscribe_find_service, request_service))
    }

    /// Enabled local servers.
    pub fn available_services(&self) -> Vec<(ServiceInterface, ServiceInstance)> {
        self.inner.available_services()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.config().name)
            .finish_non_exhaustive()
    }
}
