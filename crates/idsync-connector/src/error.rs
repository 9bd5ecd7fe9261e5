//! Connector error types
//!
//! Errors raised by a resource, split into transient ones (the resource is
//! unreachable, a later run may succeed) and permanent ones.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The resource could not be reached.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The resource answered that it cannot serve requests right now.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// The resource refused or failed a read or write.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// An object lacks data the connector needs (its uid attribute, usually).
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// The sync token does not come from this connector.
    #[error("invalid sync token: {token}")]
    InvalidSyncToken { token: String },
}

impl ConnectorError {
    /// Whether a later attempt may succeed without any change on our side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. } | ConnectorError::TargetUnavailable { .. }
        )
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Operation failure keeping the underlying error as its source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectNotFound {
            identifier: identifier.into(),
        }
    }

    pub fn already_exists(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectAlreadyExists {
            identifier: identifier.into(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
