//! Runner error types and exit codes

use idsync_provisioning::{JobError, TokenStoreError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::snapshot::SnapshotError;

/// Exit codes for the runner
/// - 0: Success
/// - 1: General error
/// - 2: Run completed with failed records
/// - 3: Invalid configuration or task
/// - 4: Backend unavailable
pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Invalid task file {path}: {message}")]
    Task { path: String, message: String },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{failed} record(s) failed")]
    RecordsFailed { failed: u32 },
}

impl RunnerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerError::RecordsFailed { .. } => 2,
            RunnerError::Config(_)
            | RunnerError::Task { .. }
            | RunnerError::Job(JobError::Configuration { .. }) => 3,
            RunnerError::Database(_)
            | RunnerError::TokenStore(_)
            | RunnerError::Job(JobError::TokenStore(_) | JobError::Connector { .. }) => 4,
            _ => 1,
        }
    }

    pub fn print(&self) {
        eprintln!("Error: {self}");
    }
}
