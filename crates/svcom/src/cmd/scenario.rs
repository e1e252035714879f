//! The counter service shared by `demo`, `watch` and `doctor`.
//!
//! Values travel as decimal text framed by the `length-prefix` transform.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use svcom_plugin::{LengthPrefix, PayloadTransform, PluginHost, PluginRegistration};
use svcom_runtime::{
    EnabledServerConnector, EventId, MethodCall, MethodId, MethodInvocation, Payload, Runtime,
    ServerCallbacks, ServiceInstance, ServiceInterface, ServiceInterfaceConfiguration, Version,
};

use crate::exit::{plugin_error, runtime_error, CliError, CliResult, DATA_INVALID};

pub const SERVICE_ID: &str = "svcom.demo.counter";
pub const VALUE_EVENT: EventId = 0;
pub const ECHO_METHOD: MethodId = 0;
pub const TRANSFORM: &str = "length-prefix";

pub fn interface() -> ServiceInterface {
    ServiceInterface::new(SERVICE_ID, Version::new(1, 0))
}

pub fn configuration() -> ServiceInterfaceConfiguration {
    ServiceInterfaceConfiguration::new(interface(), 1, 1)
}

/// A plugin host with the value transform registered. Keep the
/// registration alive while the host is used.
pub fn plugin_host() -> (PluginHost, PluginRegistration) {
    let host = PluginHost::default();
    let registration = host.transforms().register(TRANSFORM, LengthPrefix::factory());
    (host, registration)
}

pub fn transform(host: &PluginHost, runtime: &Runtime) -> CliResult<Box<dyn PayloadTransform>> {
    host.transform(TRANSFORM, runtime)
        .map_err(|err| plugin_error("transform setup failed", err))
}

pub fn encode(transform: &dyn PayloadTransform, value: u64) -> CliResult<Payload> {
    transform
        .to_wire(&Payload::from(value.to_string().into_bytes()))
        .map_err(|err| plugin_error("encode failed", err))
}

pub fn decode(transform: &dyn PayloadTransform, payload: &Payload) -> CliResult<u64> {
    let local = transform
        .from_wire(payload)
        .map_err(|err| plugin_error("decode failed", err))?;
    std::str::from_utf8(local.data())
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| CliError::new(DATA_INVALID, "event value is not a decimal number"))
}

/// An enabled counter provider.
///
/// Method [`ECHO_METHOD`] returns its argument. Update requests are answered
/// with the current value.
pub struct Provider {
    server: EnabledServerConnector,
    transform: Box<dyn PayloadTransform>,
    value: Arc<AtomicU64>,
}

impl Provider {
    pub fn start(runtime: &Runtime, host: &PluginHost, instance: &str) -> CliResult<Self> {
        let value = Arc::new(AtomicU64::new(0));
        let current = value.clone();
        let responder = transform(host, runtime)?;

        let callbacks = ServerCallbacks::new()
            .on_method_call(|_, call: MethodCall| {
                if call.method_id != ECHO_METHOD {
                    return None;
                }
                call.reply.reply(call.payload);
                Some(MethodInvocation::detached())
            })
            .on_event_subscription_change(|ctx, id, state| {
                tracing::debug!(
                    instance = %ctx.service_instance(),
                    event = id,
                    ?state,
                    "subscription changed"
                );
            })
            .on_event_update_request(move |ctx, id| {
                let value = current.load(Ordering::SeqCst);
                let result = encode(responder.as_ref(), value).and_then(|payload| {
                    ctx.update_requested_event(id, payload)
                        .map_err(|err| runtime_error("update failed", err))
                });
                if let Err(err) = result {
                    tracing::warn!(event = id, error = %err, "could not answer update request");
                }
            });

        let server = runtime
            .make_server_connector(configuration(), ServiceInstance::new(instance), callbacks)
            .map_err(|err| runtime_error("provider setup failed", err))?
            .enable();
        Ok(Self {
            server,
            transform: transform(host, runtime)?,
            value,
        })
    }

    /// Publish the next value and return it.
    pub fn publish(&self) -> CliResult<u64> {
        let value = self.value.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = encode(self.transform.as_ref(), value)?;
        self.server
            .update_event(VALUE_EVENT, payload)
            .map_err(|err| runtime_error("publish failed", err))?;
        Ok(value)
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Stop advertising the service.
    pub fn shutdown(self) {
        drop(self.server.disable());
    }
}
