//! Sandbox snapshot file.
//!
//! A snapshot holds everything a run touches when no real backends are
//! configured: the resource's objects and change log, the local records,
//! the sync tokens and the remediation queue. The runner loads it, runs the task, and writes the
//! result back.

use std::io::Write;
use std::path::{Path, PathBuf};

use idsync_connector::prelude::ConnectorSnapshot;
use idsync_provisioning::{LocalRecord, Remediation, SyncToken};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot file errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted sandbox state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sandbox {
    /// Resource state.
    #[serde(default)]
    pub connector: ConnectorSnapshot,
    /// Local users and groups.
    #[serde(default)]
    pub records: Vec<LocalRecord>,
    /// Stored sync tokens.
    #[serde(default)]
    pub tokens: Vec<SyncToken>,
    /// Failed pull records awaiting retry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediations: Vec<Remediation>,
}

impl Sandbox {
    /// Load a snapshot; a missing file yields an empty sandbox.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SnapshotError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the snapshot, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let write_err = |source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let json = serde_json::to_vec_pretty(self).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        file.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}
