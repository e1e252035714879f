use std::fmt;

use svcom_runtime::Runtime;

use crate::bridge::{NetworkBridge, NetworkBridgeFactory, PollStatus};
use crate::config::PluginConfig;
use crate::error::{PluginError, Result};
use crate::registry::PluginRegistry;
use crate::transform::{PayloadTransform, PayloadTransformFactory};

/// Bridge and transform registries plus the settings used to instantiate
/// them.
#[derive(Debug, Clone, Default)]
pub struct PluginHost {
    bridges: PluginRegistry<NetworkBridgeFactory>,
    transforms: PluginRegistry<PayloadTransformFactory>,
    config: PluginConfig,
}

impl PluginHost {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn bridges(&self) -> &PluginRegistry<NetworkBridgeFactory> {
        &self.bridges
    }

    pub fn transforms(&self) -> &PluginRegistry<PayloadTransformFactory> {
        &self.transforms
    }

    /// Instantiate every registered bridge with the configured binding.
    ///
    /// Fails on the first factory error; bridges created before it are
    /// dropped again.
    pub fn start_bridges(&self, runtime: &Runtime) -> Result<RunningBridges> {
        let mut running = Vec::new();
        for (name, factory) in self.bridges.factories() {
            match factory(runtime, &self.config.binding) {
                Ok(bridge) => {
                    tracing::info!(
                        bridge = %name,
                        interface = %self.config.binding.network_interface,
                        "bridge started"
                    );
                    running.push(bridge);
                }
                Err(err) => {
                    tracing::warn!(bridge = %name, error = %err, "bridge failed to start");
                    return Err(match err {
                        err @ PluginError::Bridge { .. } => err,
                        other => PluginError::bridge(name, other),
                    });
                }
            }
        }
        Ok(RunningBridges { bridges: running })
    }

    /// Instantiate the transform registered as `name`.
    pub fn transform(&self, name: &str, runtime: &Runtime) -> Result<Box<dyn PayloadTransform>> {
        let factory = self
            .transforms
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        factory(runtime)
    }
}

/// Bridges created by [`PluginHost::start_bridges`].
#[derive(Default)]
pub struct RunningBridges {
    bridges: Vec<Box<dyn NetworkBridge>>,
}

impl RunningBridges {
    /// Poll every bridge once. Finished bridges are dropped.
    ///
    /// Returns the number of bridges that made progress.
    pub fn poll_all(&mut self) -> Result<usize> {
        let mut progressed = 0;
        let mut index = 0;
        while index < self.bridges.len() {
            match self.bridges[index].poll()? {
                PollStatus::Idle => index += 1,
                PollStatus::Progress => {
                    progressed += 1;
                    index += 1;
                }
                PollStatus::Finished => {
                    let bridge = self.bridges.remove(index);
                    tracing::debug!(bridge = bridge.name(), "bridge finished");
                }
            }
        }
        Ok(progressed)
    }

    pub fn names(&self) -> Vec<&str> {
        self.bridges.iter().map(|bridge| bridge.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

impl fmt::Debug for RunningBridges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
