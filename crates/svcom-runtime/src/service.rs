use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Interface version. Majors must match; a client may bind to a server with
/// an equal or newer minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An abstract, versioned service type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceInterface {
    pub id: String,
    pub version: Version,
}

impl ServiceInterface {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Same id and major version, ignoring the minor.
    pub fn same_major(&self, other: &ServiceInterface) -> bool {
        self.id == other.id && self.version.major == other.version.major
    }

    /// True if a client expecting `self` can bind to a server offering `offered`.
    pub fn is_compatible_with(&self, offered: &ServiceInterface) -> bool {
        self.same_major(offered) && self.version.minor <= offered.version.minor
    }
}

impl fmt::Display for ServiceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Identifies one running provider of an interface.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceInstance {
    pub id: String,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for ServiceInstance {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Shape of a service interface: how many methods and events it exposes.
///
/// Ordered by `(num_methods, num_events, interface)`. Sorted containers
/// written against other implementations rely on this exact order.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceInterfaceConfiguration {
    pub interface: ServiceInterface,
    pub num_methods: u16,
    pub num_events: u16,
}

impl ServiceInterfaceConfiguration {
    pub fn new(interface: ServiceInterface, num_methods: u16, num_events: u16) -> Self {
        Self {
            interface,
            num_methods,
            num_events,
        }
    }

    fn sort_key(&self) -> (u16, u16, &ServiceInterface) {
        (self.num_methods, self.num_events, &self.interface)
    }
}

impl PartialEq for ServiceInterfaceConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ServiceInterfaceConfiguration {}

impl Hash for ServiceInterfaceConfiguration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl PartialOrd for ServiceInterfaceConfiguration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceInterfaceConfiguration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Configuration as seen from a client: the server's actual interface.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerServiceInterfaceConfiguration {
    configuration: ServiceInterfaceConfiguration,
}

impl ServerServiceInterfaceConfiguration {
    pub fn new(interface: ServiceInterface, num_methods: u16, num_events: u16) -> Self {
        Self {
            configuration: ServiceInterfaceConfiguration::new(interface, num_methods, num_events),
        }
    }

    /// Placeholder reported while no server is bound.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::invalid()
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.configuration.interface
    }

    pub fn num_methods(&self) -> u16 {
        self.configuration.num_methods
    }

    pub fn num_events(&self) -> u16 {
        self.configuration.num_events
    }

    pub fn configuration(&self) -> &ServiceInterfaceConfiguration {
        &self.configuration
    }
}

impl From<ServiceInterfaceConfiguration> for ServerServiceInterfaceConfiguration {
    fn from(configuration: ServiceInterfaceConfiguration) -> Self {
        Self { configuration }
    }
}

/// Key under which a server connector is unique: interface (with version)
/// plus instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ServiceIdentifier {
    pub interface: ServiceInterface,
    pub instance: ServiceInstance,
}

impl PartialOrd for ServiceIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.instance, &self.interface).cmp(&(&other.instance, &other.interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(id: &str, major: u16, minor: u16) -> ServiceInterface {
        ServiceInterface::new(id, Version::new(major, minor))
    }

    #[test]
    fn configuration_orders_by_counts_before_interface() {
        let small = ServiceInterfaceConfiguration::new(iface("zzz", 9, 9), 1, 5);
        let large = ServiceInterfaceConfiguration::new(iface("aaa", 0, 0), 2, 0);
        assert!(small < large);

        let fewer_events = ServiceInterfaceConfiguration::new(iface("zzz", 1, 0), 1, 1);
        let more_events = ServiceInterfaceConfiguration::new(iface("aaa", 1, 0), 1, 2);
        assert!(fewer_events < more_events);

        let a = ServiceInterfaceConfiguration::new(iface("a", 1, 0), 1, 1);
        let b = ServiceInterfaceConfiguration::new(iface("b", 1, 0), 1, 1);
        assert!(a < b);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn interfaces_order_by_id_then_version() {
        assert!(iface("a", 2, 0) < iface("b", 1, 0));
        assert!(iface("a", 1, 3) < iface("a", 2, 0));
        assert!(iface("a", 1, 0) < iface("a", 1, 1));
    }

    #[test]
    fn minor_upgrade_is_compatible_downgrade_is_not() {
        let client = iface("svc", 1, 2);
        assert!(client.is_compatible_with(&iface("svc", 1, 2)));
        assert!(client.is_compatible_with(&iface("svc", 1, 5)));
        assert!(!client.is_compatible_with(&iface("svc", 1, 1)));
        assert!(!client.is_compatible_with(&iface("svc", 2, 2)));
        assert!(!client.is_compatible_with(&iface("other", 1, 2)));
    }

    #[test]
    fn invalid_server_configuration_is_empty() {
        let invalid = ServerServiceInterfaceConfiguration::invalid();
        assert!(invalid.interface().id.is_empty());
        assert_eq!(invalid.interface().version, Version::new(0, 0));
        assert_eq!(invalid.num_methods(), 0);
        assert_eq!(invalid.num_events(), 0);
        assert!(!invalid.is_valid());
    }

    #[test]
    fn service_identifier_orders_by_instance_first() {
        let a = ServiceIdentifier {
            interface: iface("z", 1, 0),
            instance: ServiceInstance::new("a"),
        };
        let b = ServiceIdentifier {
            interface: iface("a", 1, 0),
            instance: ServiceInstance::new("b"),
        };
        assert!(a < b);
    }
}
