use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where a network bridge attaches and which service manifests it serves.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeBinding {
    /// Name of the network interface, e.g. `eth0`. Empty means any.
    pub network_interface: String,
    /// Local address to bind. `None` lets the bridge choose.
    pub ip_address: Option<IpAddr>,
    /// Service manifests describing what the bridge imports and exports.
    pub manifests: Vec<PathBuf>,
}

impl BridgeBinding {
    pub fn new(network_interface: impl Into<String>) -> Self {
        Self {
            network_interface: network_interface.into(),
            ..Self::default()
        }
    }

    pub fn with_ip_address(mut self, ip_address: IpAddr) -> Self {
        self.ip_address = Some(ip_address);
        self
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifests.push(manifest.into());
        self
    }
}

/// Settings of a [`crate::PluginHost`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Binding handed to every bridge factory.
    pub binding: BridgeBinding,
}

impl PluginConfig {
    pub fn with_binding(mut self, binding: BridgeBinding) -> Self {
        self.binding = binding;
        self
    }

    /// Parse a JSON document, as embedded in an application's own
    /// settings. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
