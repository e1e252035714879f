use std::sync::Arc;

use svcom_runtime::Runtime;

use crate::config::BridgeBinding;
use crate::error::Result;

/// What a bridge did during one [`NetworkBridge::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollStatus {
    /// Nothing was pending.
    Idle,
    /// Some work was done; poll again soon.
    Progress,
    /// The bridge shut down and needs no further polling.
    Finished,
}

/// A bridge connecting the local runtime to a network protocol.
///
/// Implementations usually register themselves with
/// [`Runtime::register_service_bridge`] when created and keep the returned
/// registration for their lifetime.
pub trait NetworkBridge: Send {
    fn name(&self) -> &str;

    /// Do pending I/O without blocking.
    fn poll(&mut self) -> Result<PollStatus>;
}

/// Creates a bridge attached to `runtime` at `binding`.
pub type NetworkBridgeFactory =
    Arc<dyn Fn(&Runtime, &BridgeBinding) -> Result<Box<dyn NetworkBridge>> + Send + Sync>;
