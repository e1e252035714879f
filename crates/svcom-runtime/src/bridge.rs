//! Hooks through which a network bridge extends local discovery.
//!
//! A bridge registers two functions with the runtime. The runtime forwards
//! every active find subscription to `subscribe_find_service` and every
//! client waiting for a missing service to `request_service`, including the
//! ones that existed before the bridge registered.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::discovery::{FindResultStatus, FindSubscription};
use crate::runtime::RuntimeInner;
use crate::service::{ServiceInstance, ServiceInterface, ServiceInterfaceConfiguration};

/// Opaque identity of a bridge, used to keep a bridge from seeing its own
/// services echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeIdentity(u64);

impl BridgeIdentity {
    /// Derive an identity from any hashable discriminator, e.g. a bridge name.
    pub fn new(discriminator: impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        discriminator.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Identity derived from the address of a bridge object.
    pub fn of<T: ?Sized>(bridge: &T) -> Self {
        Self(bridge as *const T as *const () as usize as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BridgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Reports services found by a bridge back to the runtime.
pub type FindResultChangeCallback =
    Arc<dyn Fn(&ServiceInterface, &ServiceInstance, FindResultStatus) + Send + Sync>;

/// Start looking for `interface` (and `instance`, if given) on the network.
pub type SubscribeFindServiceFn = Arc<
    dyn Fn(
            FindResultChangeCallback,
            &ServiceInterface,
            Option<&ServiceInstance>,
        ) -> FindSubscription
        + Send
        + Sync,
>;

/// Start providing a local proxy for a service a client waits for.
pub type RequestServiceFn = Arc<
    dyn Fn(&ServiceInterfaceConfiguration, &ServiceInstance) -> ServiceRequest + Send + Sync,
>;

/// A bridge's handle for a requested service. Dropping it tells the bridge
/// the service is no longer wanted.
pub struct ServiceRequest {
    _guard: Option<Box<dyn Send>>,
}

impl ServiceRequest {
    pub fn from_guard<G: Send + 'static>(guard: G) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    pub fn empty() -> Self {
        Self { _guard: None }
    }
}

impl fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

/// Keeps a bridge registered. Dropping it releases every find subscription
/// and service request handed to the bridge and withdraws the services it
/// reported.
pub struct ServiceBridgeRegistration {
    runtime: Arc<RuntimeInner>,
    id: u64,
    identity: BridgeIdentity,
}

impl ServiceBridgeRegistration {
    pub(crate) fn new(runtime: Arc<RuntimeInner>, id: u64, identity: BridgeIdentity) -> Self {
        Self {
            runtime,
            id,
            identity,
        }
    }

    pub fn identity(&self) -> BridgeIdentity {
        self.identity
    }
}

impl Drop for ServiceBridgeRegistration {
    fn drop(&mut self) {
        self.runtime.remove_bridge(self.id);
    }
}

impl fmt::Debug for ServiceBridgeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBridgeRegistration")
            .field("identity", &self.identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_name_is_stable() {
        assert_eq!(BridgeIdentity::new("someip"), BridgeIdentity::new("someip"));
        assert_ne!(BridgeIdentity::new("someip"), BridgeIdentity::new("dds"));
    }

    #[test]
    fn identity_of_distinct_objects_differs() {
        let a = 1u32;
        let b = 2u32;
        assert_ne!(BridgeIdentity::of(&a), BridgeIdentity::of(&b));
        assert_eq!(BridgeIdentity::from_raw(7).as_raw(), 7);
    }
}
