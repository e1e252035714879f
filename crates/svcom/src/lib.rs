//! Service-oriented communication between components of one process.
//!
//! Providers offer versioned service interfaces through server connectors;
//! consumers bind to them through client connectors, subscribe to events
//! and call methods. Network bridges extend discovery beyond the process.
//!
//! # Crate Structure
//!
//! - [`payload`]: Byte buffers with lead, header and data sections
//! - [`runtime`]: Connectors, discovery and bridge registration
//! - [`plugin`]: Bridge and transform plugin contracts (behind `plugin` feature)

/// Re-export payload types.
pub mod payload {
    pub use svcom_payload::*;
}

/// Re-export runtime types.
pub mod runtime {
    pub use svcom_runtime::*;
}

/// Re-export plugin types (requires `plugin` feature).
#[cfg(feature = "plugin")]
pub mod plugin {
    pub use svcom_plugin::*;
}

pub use svcom_runtime::{Error, Result, Runtime};
