//! Sync token persistence.
//!
//! Tokens are stored per (resource, object class). A run writes all of its
//! tokens in one `put_all` call so a resource never ends up with users
//! advanced and groups not.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use idsync_connector::ObjectClass;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::TokenStoreError;

/// Stored position of an incremental sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncToken {
    /// Resource the token belongs to.
    pub resource: String,
    /// Object class the token belongs to.
    pub object_class: ObjectClass,
    /// Opaque connector-specific value.
    pub token_value: String,
    /// Incremented on every write (for optimistic locking).
    pub sequence_number: i64,
    /// When the token was last advanced.
    pub updated_at: DateTime<Utc>,
}

impl SyncToken {
    /// Create a new token at sequence 1.
    pub fn new(
        resource: impl Into<String>,
        object_class: ObjectClass,
        token_value: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            object_class,
            token_value: token_value.into(),
            sequence_number: 1,
            updated_at: Utc::now(),
        }
    }

    /// Check if the token can be used to resume.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        !self.token_value.is_empty()
    }
}

/// Persistence for sync tokens.
#[async_trait]
pub trait SyncTokenStore: Send + Sync {
    /// Get the current token.
    async fn get(
        &self,
        resource: &str,
        object_class: ObjectClass,
    ) -> Result<Option<SyncToken>, TokenStoreError>;

    /// Atomically store new token values for several object classes.
    async fn put_all(
        &self,
        resource: &str,
        tokens: &[(ObjectClass, String)],
    ) -> Result<(), TokenStoreError>;

    /// Delete every token of a resource (forces a full resync).
    async fn reset(&self, resource: &str) -> Result<bool, TokenStoreError>;
}

/// [`SyncTokenStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySyncTokenStore {
    tokens: RwLock<BTreeMap<(String, ObjectClass), SyncToken>>,
    fail_writes: AtomicBool,
}

impl InMemorySyncTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `tokens`.
    #[must_use]
    pub fn with_tokens(tokens: impl IntoIterator<Item = SyncToken>) -> Self {
        Self {
            tokens: RwLock::new(
                tokens
                    .into_iter()
                    .map(|t| ((t.resource.clone(), t.object_class), t))
                    .collect(),
            ),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Every stored token.
    pub async fn tokens(&self) -> Vec<SyncToken> {
        self.tokens.read().await.values().cloned().collect()
    }

    /// Make `put_all` fail (simulates an unavailable backend).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncTokenStore for InMemorySyncTokenStore {
    async fn get(
        &self,
        resource: &str,
        object_class: ObjectClass,
    ) -> Result<Option<SyncToken>, TokenStoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(resource.to_string(), object_class))
            .cloned())
    }

    async fn put_all(
        &self,
        resource: &str,
        tokens: &[(ObjectClass, String)],
    ) -> Result<(), TokenStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TokenStoreError::Backend {
                message: "token store unavailable".to_string(),
            });
        }

        let mut stored = self.tokens.write().await;
        for (object_class, value) in tokens {
            let key = (resource.to_string(), *object_class);
            let sequence = stored.get(&key).map_or(1, |t| t.sequence_number + 1);
            stored.insert(
                key,
                SyncToken {
                    sequence_number: sequence,
                    ..SyncToken::new(resource, *object_class, value.clone())
                },
            );
        }
        Ok(())
    }

    async fn reset(&self, resource: &str) -> Result<bool, TokenStoreError> {
        let mut stored = self.tokens.write().await;
        let before = stored.len();
        stored.retain(|(r, _), _| r != resource);
        Ok(stored.len() != before)
    }
}

/// [`SyncTokenStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgSyncTokenStore {
    pool: PgPool,
}

impl PgSyncTokenStore {
    /// Create a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), TokenStoreError> {
        info!("Running sync token migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Update a token only if its sequence number still matches.
    ///
    /// Returns `None` on concurrent modification.
    #[instrument(skip(self))]
    pub async fn update_if_sequence_matches(
        &self,
        resource: &str,
        object_class: ObjectClass,
        expected_sequence: i64,
        new_token_value: &str,
    ) -> Result<Option<SyncToken>, TokenStoreError> {
        let result = sqlx::query_as::<_, SyncTokenRow>(
            r"
            UPDATE idsync_sync_tokens
            SET token_value = $4,
                sequence_number = sequence_number + 1,
                last_processed_at = NOW(),
                updated_at = NOW()
            WHERE resource = $1
                AND object_class = $2
                AND sequence_number = $3
            RETURNING resource, object_class, token_value, sequence_number, updated_at
            ",
        )
        .bind(resource)
        .bind(object_class.as_str())
        .bind(expected_sequence)
        .bind(new_token_value)
        .fetch_optional(&self.pool)
        .await?;

        result.map(SyncTokenRow::into_token).transpose()
    }
}

#[async_trait]
impl SyncTokenStore for PgSyncTokenStore {
    #[instrument(skip(self))]
    async fn get(
        &self,
        resource: &str,
        object_class: ObjectClass,
    ) -> Result<Option<SyncToken>, TokenStoreError> {
        let result = sqlx::query_as::<_, SyncTokenRow>(
            r"
            SELECT resource, object_class, token_value, sequence_number, updated_at
            FROM idsync_sync_tokens
            WHERE resource = $1 AND object_class = $2
            ",
        )
        .bind(resource)
        .bind(object_class.as_str())
        .fetch_optional(&self.pool)
        .await?;

        result.map(SyncTokenRow::into_token).transpose()
    }

    #[instrument(skip(self, tokens), fields(count = tokens.len()))]
    async fn put_all(
        &self,
        resource: &str,
        tokens: &[(ObjectClass, String)],
    ) -> Result<(), TokenStoreError> {
        let mut tx = self.pool.begin().await?;

        for (object_class, value) in tokens {
            sqlx::query(
                r"
                INSERT INTO idsync_sync_tokens (resource, object_class, token_value, last_processed_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (resource, object_class) DO UPDATE SET
                    token_value = EXCLUDED.token_value,
                    sequence_number = idsync_sync_tokens.sequence_number + 1,
                    last_processed_at = NOW(),
                    updated_at = NOW()
                ",
            )
            .bind(resource)
            .bind(object_class.as_str())
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(resource, "Sync tokens committed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset(&self, resource: &str) -> Result<bool, TokenStoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM idsync_sync_tokens
            WHERE resource = $1
            ",
        )
        .bind(resource)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database row for sync token.
#[derive(Debug, sqlx::FromRow)]
struct SyncTokenRow {
    resource: String,
    object_class: String,
    token_value: String,
    sequence_number: i64,
    updated_at: DateTime<Utc>,
}

impl SyncTokenRow {
    fn into_token(self) -> Result<SyncToken, TokenStoreError> {
        let object_class = self
            .object_class
            .parse::<ObjectClass>()
            .map_err(|e| TokenStoreError::Backend {
                message: e.to_string(),
            })?;
        Ok(SyncToken {
            resource: self.resource,
            object_class,
            token_value: self.token_value,
            sequence_number: self.sequence_number,
            updated_at: self.updated_at,
        })
    }
}
