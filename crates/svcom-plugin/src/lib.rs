//! Plugin contracts for svcom.
//!
//! Network bridges and payload transforms are supplied as factories kept in
//! explicit [`PluginRegistry`] objects. A [`PluginHost`] bundles both
//! registries with a [`PluginConfig`] and instantiates the plugins against
//! a [`svcom_runtime::Runtime`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod transform;

pub use bridge::{NetworkBridge, NetworkBridgeFactory, PollStatus};
pub use config::{BridgeBinding, PluginConfig};
pub use error::{PluginError, Result};
pub use host::{PluginHost, RunningBridges};
pub use registry::{PluginRegistration, PluginRegistry};
pub use transform::{LengthPrefix, PayloadTransform, PayloadTransformFactory};
