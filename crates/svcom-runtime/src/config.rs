use std::time::Duration;

use crate::credentials::PosixCredentials;

/// Default threshold above which a callback is reported as slow.
pub const DEFAULT_SLOW_CALLBACK_THRESHOLD: Duration = Duration::from_millis(250);

/// Runtime-wide settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Name used for dispatcher threads and log fields.
    pub name: String,
    /// Credentials used when a connector is created without explicit ones.
    pub credentials: PosixCredentials,
    /// Callbacks running longer than this produce a warning. `None` disables the check.
    pub slow_callback_threshold: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "svcom".to_string(),
            credentials: PosixCredentials::current(),
            slow_callback_threshold: Some(DEFAULT_SLOW_CALLBACK_THRESHOLD),
        }
    }
}

impl RuntimeConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_credentials(mut self, credentials: PosixCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_slow_callback_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_callback_threshold = threshold;
        self
    }
}
