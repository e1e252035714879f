use std::fmt;

use svcom_plugin::PluginError;
use svcom_runtime::{ConnectorError, ConstructionError, Error};

// Exit codes follow the 3leaps CLI convention.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn runtime_error(context: &str, err: Error) -> CliError {
    let code = match err {
        Error::Connector(ConnectorError::ServiceNotAvailable)
        | Error::Connector(ConnectorError::RequestRejected) => FAILURE,
        Error::Connector(ConnectorError::PermissionNotAllowed) => PERMISSION_DENIED,
        Error::Connector(ConnectorError::MalformedPayload) => DATA_INVALID,
        Error::Connector(ConnectorError::IdOutOfRange) | Error::ServerConnector(_) => USAGE,
        Error::Construction(ConstructionError::DuplicateService) => FAILURE,
        Error::Construction(ConstructionError::CallbackMissing) => INTERNAL,
    };
    CliError::new(
        code,
        format!("{context}: {err} ({}:{})", err.domain().name(), err.code()),
    )
}

pub fn plugin_error(context: &str, err: PluginError) -> CliError {
    match err {
        PluginError::Runtime(err) => runtime_error(context, err),
        PluginError::InvalidConfig(_) | PluginError::Transform(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PluginError::NotFound(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PluginError::Bridge { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
