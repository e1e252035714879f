/// Errors reported by connector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConnectorError {
    /// The service instance is not (or no longer) bound.
    #[error("Service not available")]
    ServiceNotAvailable,

    /// The provider refused the request.
    #[error("Request rejected")]
    RequestRejected,

    /// An event or method id exceeds the interface configuration.
    #[error("ID out of range")]
    IdOutOfRange,

    /// A payload could not be interpreted.
    #[error("Malformed payload")]
    MalformedPayload,

    /// The provider denied access to the caller.
    #[error("Permission not allowed")]
    PermissionNotAllowed,
}

/// Errors reported by server connector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ServerConnectorError {
    /// An event id exceeds the interface configuration.
    #[error("ID out of range")]
    IdOutOfRange,
}

/// Errors reported while constructing connectors or registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConstructionError {
    /// A server connector for the same interface and instance already exists.
    #[error("Duplicate service")]
    DuplicateService,

    /// A required callback was not supplied.
    #[error("Callback missing")]
    CallbackMissing,
}

/// The domain an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Connector,
    ServerConnector,
    Construction,
}

impl ErrorDomain {
    pub fn name(self) -> &'static str {
        match self {
            ErrorDomain::Connector => "connector",
            ErrorDomain::ServerConnector => "server_connector",
            ErrorDomain::Construction => "construction",
        }
    }
}

/// Any recoverable runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    ServerConnector(#[from] ServerConnectorError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

impl Error {
    pub fn domain(&self) -> ErrorDomain {
        match self {
            Error::Connector(_) => ErrorDomain::Connector,
            Error::ServerConnector(_) => ErrorDomain::ServerConnector,
            Error::Construction(_) => ErrorDomain::Construction,
        }
    }

    /// Numeric code, unique within the error's domain.
    pub fn code(&self) -> u32 {
        match self {
            Error::Connector(err) => match err {
                ConnectorError::ServiceNotAvailable => 1,
                ConnectorError::RequestRejected => 2,
                ConnectorError::IdOutOfRange => 3,
                ConnectorError::MalformedPayload => 4,
                ConnectorError::PermissionNotAllowed => 5,
            },
            Error::ServerConnector(ServerConnectorError::IdOutOfRange) => 1,
            Error::Construction(err) => match err {
                ConstructionError::DuplicateService => 1,
                ConstructionError::CallbackMissing => 2,
            },
        }
    }

    /// Human readable message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Error::Connector(err) => match err {
                ConnectorError::ServiceNotAvailable => "Service not available",
                ConnectorError::RequestRejected => "Request rejected",
                ConnectorError::IdOutOfRange => "ID out of range",
                ConnectorError::MalformedPayload => "Malformed payload",
                ConnectorError::PermissionNotAllowed => "Permission not allowed",
            },
            Error::ServerConnector(ServerConnectorError::IdOutOfRange) => "ID out of range",
            Error::Construction(err) => match err {
                ConstructionError::DuplicateService => "Duplicate service",
                ConstructionError::CallbackMissing => "Callback missing",
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_message() {
        let all = [
            Error::from(ConnectorError::ServiceNotAvailable),
            ConnectorError::RequestRejected.into(),
            ConnectorError::IdOutOfRange.into(),
            ConnectorError::MalformedPayload.into(),
            ConnectorError::PermissionNotAllowed.into(),
            ServerConnectorError::IdOutOfRange.into(),
            ConstructionError::DuplicateService.into(),
            ConstructionError::CallbackMissing.into(),
        ];
        for err in all {
            assert_eq!(err.to_string(), err.message());
        }
    }

    #[test]
    fn codes_are_unique_per_domain() {
        let connector: Vec<u32> = [
            ConnectorError::ServiceNotAvailable,
            ConnectorError::RequestRejected,
            ConnectorError::IdOutOfRange,
            ConnectorError::MalformedPayload,
            ConnectorError::PermissionNotAllowed,
        ]
        .into_iter()
        .map(|e| Error::from(e).code())
        .collect();
        let mut deduped = connector.clone();
        deduped.dedup();
        assert_eq!(connector, deduped);
    }

    #[test]
    fn domains_are_distinguished() {
        let a = Error::from(ConnectorError::IdOutOfRange);
        let b = Error::from(ServerConnectorError::IdOutOfRange);
        assert_eq!(a.domain(), ErrorDomain::Connector);
        assert_eq!(b.domain(), ErrorDomain::ServerConnector);
        assert_ne!(a, b);
        assert_eq!(a.message(), b.message());
    }
}
