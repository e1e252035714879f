/// Errors reported by plugins and the plugin host.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A configuration document is not valid JSON for [`crate::PluginConfig`].
    #[error("invalid plugin config: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// No plugin is registered under the given name.
    #[error("no plugin registered as {0:?}")]
    NotFound(String),

    /// A bridge failed to start or to make progress.
    #[error("bridge {name} failed: {message}")]
    Bridge { name: String, message: String },

    /// A payload could not be converted.
    #[error("payload transform failed: {0}")]
    Transform(String),

    /// The runtime refused an operation on behalf of a plugin.
    #[error(transparent)]
    Runtime(#[from] svcom_runtime::Error),
}

impl PluginError {
    pub fn bridge(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PluginError::Bridge {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
