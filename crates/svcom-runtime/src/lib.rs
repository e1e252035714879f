//! In-process service-oriented communication.
//!
//! A [`Runtime`] connects service providers and consumers inside one
//! process:
//!
//! - [`DisabledServerConnector`] / [`EnabledServerConnector`] provide a
//!   service instance: they publish events and answer method calls.
//! - [`ClientConnector`] consumes one: it subscribes to events and calls
//!   methods.
//! - [`Runtime::subscribe_find_service`] reports which instances exist.
//! - [`Runtime::register_service_bridge`] lets a network bridge extend
//!   discovery beyond the process.
//!
//! Every connector delivers its callbacks on its own dispatcher thread, one
//! at a time and in order. Dropping a connector or subscription handle
//! waits for a callback running on another thread; afterwards none of its
//! callbacks run again.
//!
//! # Features
//!
//! - `serde`: serialization of descriptors and identifiers.
//! - `async`: [`ClientContext::call_method_async`] returning a future.

pub mod bridge;
pub mod client;
pub mod config;
pub mod credentials;
pub mod discovery;
mod dispatch;
pub mod error;
pub mod event;
pub mod method;
pub mod runtime;
pub mod server;
pub mod service;

pub use bridge::{
    BridgeIdentity, FindResultChangeCallback, RequestServiceFn, ServiceBridgeRegistration,
    ServiceRequest, SubscribeFindServiceFn,
};
#[cfg(feature = "async")]
pub use client::PendingReply;
pub use client::{
    ClientCallbacks, ClientConnector, ClientContext, EventPayloadAllocateFn, ServiceState,
};
pub use config::{RuntimeConfig, DEFAULT_SLOW_CALLBACK_THRESHOLD};
pub use credentials::PosixCredentials;
pub use discovery::{FindResultStatus, FindSubscription};
pub use error::{
    ConnectorError, ConstructionError, Error, ErrorDomain, Result, ServerConnectorError,
};
pub use event::{Event, EventId, EventMode, EventState};
pub use method::{MethodCall, MethodId, MethodInvocation, MethodReply, MethodResult, ReplyCallback};
pub use runtime::Runtime;
pub use server::{
    DisabledServerConnector, EnabledServerConnector, MethodPayloadAllocateFn, ServerCallbacks,
    ServerContext,
};
pub use service::{
    ServerServiceInterfaceConfiguration, ServiceInstance, ServiceInterface,
    ServiceInterfaceConfiguration, Version,
};
pub use svcom_payload::{Payload, PayloadMut};
