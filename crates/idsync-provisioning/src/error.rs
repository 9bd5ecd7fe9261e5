//! Provisioning error types.
//!
//! Two levels: [`ProvisioningError`] is raised while handling one record and
//! is always converted into a FAILURE or IGNORE outcome; [`JobError`] aborts
//! a whole run.

use idsync_connector::ConnectorError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the identity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("record not found: {key}")]
    NotFound { key: Uuid },

    /// A record with the same name already exists for the kind.
    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: String, name: String },

    /// Backend failure.
    #[error("store backend error: {message}")]
    Backend { message: String },
}

/// Errors raised by sync token stores.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Another writer advanced the token first.
    #[error("Sync token for {resource}/{object_class} was modified concurrently")]
    Conflict {
        resource: String,
        object_class: String,
    },

    /// Backend failure.
    #[error("Token store error: {message}")]
    Backend { message: String },
}

/// Errors raised while handling a single record.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Connector error.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Identity store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Propagation to a resource failed.
    #[error("Propagation to {resource} failed: {source}")]
    Propagation {
        resource: String,
        #[source]
        source: ConnectorError,
    },

    /// A configured action refused the operation.
    #[error("Vetoed by {action}: {message}")]
    Vetoed { action: String, message: String },

    /// A configured action asked for the record to be skipped.
    #[error("Ignored by {action}: {message}")]
    Ignored { action: String, message: String },

    /// Not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Mapping error.
    #[error("Mapping error: attribute '{attribute}' - {message}")]
    Mapping { attribute: String, message: String },
}

impl ProvisioningError {
    /// Create a veto raised by an action.
    pub fn vetoed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vetoed {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create an ignore request raised by an action.
    pub fn ignored(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ignored {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a mapping error.
    pub fn mapping(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create a propagation error.
    pub fn propagation(resource: impl Into<String>, source: ConnectorError) -> Self {
        Self::Propagation {
            resource: resource.into(),
            source,
        }
    }

    /// Check if an action asked to skip the record.
    pub fn is_ignored(&self) -> bool {
        matches!(self, ProvisioningError::Ignored { .. })
    }

    /// Message of the innermost error in the source chain.
    pub fn root_cause_message(&self) -> String {
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

/// Result type for record-level operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Errors that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum JobError {
    /// Enumerating the resource failed.
    #[error("Connector error on {resource}: {source}")]
    Connector {
        resource: String,
        #[source]
        source: ConnectorError,
    },

    /// Persisting sync tokens failed.
    #[error("Token store error: {0}")]
    TokenStore(#[from] TokenStoreError),

    /// Listing local records failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Task configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A run-level action hook failed.
    #[error("Action {action} failed: {message}")]
    Actions { action: String, message: String },

    /// Another run is active on the same resource.
    #[error("A run is already in progress for resource {resource}")]
    AlreadyRunning { resource: String },
}

impl JobError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connector error for a resource.
    pub fn connector(resource: impl Into<String>, source: ConnectorError) -> Self {
        Self::Connector {
            resource: resource.into(),
            source,
        }
    }

    /// Check if running the job again could succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Connector { source, .. } => source.is_transient(),
            JobError::TokenStore(_) | JobError::AlreadyRunning { .. } => true,
            JobError::Store(_) | JobError::Configuration { .. } | JobError::Actions { .. } => {
                false
            }
        }
    }
}

/// Result type for job runs.
pub type JobResult<T> = Result<T, JobError>;
