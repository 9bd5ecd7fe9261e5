//! Runner configuration loaded from environment variables.

use thiserror::Error;

/// Default log filter when neither `IDSYNC_LOG` nor `RUST_LOG` is set.
const DEFAULT_LOG_FILTER: &str = "info,idsync=debug";

/// Default size of the token store connection pool.
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Log filter directive (`IDSYNC_LOG`).
    pub log_filter: String,

    /// PostgreSQL URL for sync tokens (`IDSYNC_DATABASE_URL`).
    ///
    /// When absent, tokens live in the snapshot file.
    pub database_url: Option<String>,

    /// Token store pool size (`IDSYNC_DB_MAX_CONNECTIONS`).
    pub db_max_connections: u32,
}

impl RunnerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_filter = lookup("IDSYNC_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let database_url = match lookup("IDSYNC_DATABASE_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::MissingVar("IDSYNC_DATABASE_URL".to_string()));
            }
            Some(url) if !url.starts_with("postgres://") && !url.starts_with("postgresql://") => {
                return Err(ConfigError::InvalidValue {
                    var: "IDSYNC_DATABASE_URL".to_string(),
                    message: "expected a postgres:// URL".to_string(),
                });
            }
            other => other,
        };

        let db_max_connections = match lookup("IDSYNC_DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        var: "IDSYNC_DB_MAX_CONNECTIONS".to_string(),
                        message: format!("expected a positive integer, got '{raw}'"),
                    });
                }
                Ok(n) => n,
            },
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        Ok(Self {
            log_filter,
            database_url,
            db_max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RunnerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RunnerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.database_url, None);
        assert_eq!(config.db_max_connections, 5);
    }

    #[test]
    fn test_database_url_accepted() {
        let config = load(&[
            ("IDSYNC_DATABASE_URL", "postgres://idsync@localhost/idsync"),
            ("IDSYNC_DB_MAX_CONNECTIONS", "2"),
        ])
        .unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://idsync@localhost/idsync")
        );
        assert_eq!(config.db_max_connections, 2);
    }

    #[test]
    fn test_empty_database_url_rejected() {
        let err = load(&[("IDSYNC_DATABASE_URL", " ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "IDSYNC_DATABASE_URL"));
    }

    #[test]
    fn test_non_postgres_url_rejected() {
        let err = load(&[("IDSYNC_DATABASE_URL", "mysql://localhost/db")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_connections_rejected() {
        let err = load(&[("IDSYNC_DB_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for IDSYNC_DB_MAX_CONNECTIONS: expected a positive integer, got '0'"
        );
    }
}
