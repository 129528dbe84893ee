use crate::traits::{CorrelationStore, SeenStore};
use crate::types::{RelayError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Stable identity of an item within its source: base64 of SHA-256 over `url|guid`.
pub fn dedup_key(source_url: &str, guid: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}", source_url, guid).as_bytes());
    STANDARD.encode(digest)
}

/// SQLite-backed seen-item and correlation store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_url` and ensures the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        info!("Opened seen-item store at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database. Held on a single connection that is never
    /// recycled, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        Ok(store)
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_items (
                dedup_key TEXT PRIMARY KEY,
                seen_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_correlation (
                message_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn seen_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM seen_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SeenStore for SqliteStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM seen_items WHERE dedup_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO seen_items (dedup_key, seen_at)
            VALUES (?1, ?2)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CorrelationStore for SqliteStore {
    async fn record_delivery(&self, message_id: &str, source_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_correlation (message_id, source_id)
            VALUES (?1, ?2)
            ON CONFLICT (message_id)
            DO UPDATE SET source_id = EXCLUDED.source_id
            "#,
        )
        .bind(message_id)
        .bind(source_id.to_string())
        .execute(&self.pool)
        .await?;

        debug!("Recorded delivery {} for source {}", message_id, source_id);
        Ok(())
    }

    async fn source_for_message(&self, message_id: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT source_id FROM publish_correlation WHERE message_id = ?1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let raw: String = r.get("source_id");
                let id = Uuid::parse_str(&raw).map_err(|e| {
                    RelayError::Config(format!("corrupt source id {:?} in correlation store: {}", raw, e))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn forget_message(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM publish_correlation WHERE message_id = ?1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Process-local store with the same semantics as [`SqliteStore`].
#[derive(Default)]
pub struct MemoryStore {
    seen: RwLock<HashSet<String>>,
    correlations: RwLock<HashMap<String, Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seen_keys(&self) -> Vec<String> {
        self.seen.read().await.iter().cloned().collect()
    }

    pub async fn correlations(&self) -> HashMap<String, Uuid> {
        self.correlations.read().await.clone()
    }
}

#[async_trait]
impl SeenStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.seen.read().await.contains(key))
    }

    async fn mark_seen(&self, key: &str) -> Result<bool> {
        Ok(self.seen.write().await.insert(key.to_string()))
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn record_delivery(&self, message_id: &str, source_id: Uuid) -> Result<()> {
        self.correlations
            .write()
            .await
            .insert(message_id.to_string(), source_id);
        Ok(())
    }

    async fn source_for_message(&self, message_id: &str) -> Result<Option<Uuid>> {
        Ok(self.correlations.read().await.get(message_id).copied())
    }

    async fn forget_message(&self, message_id: &str) -> Result<bool> {
        Ok(self.correlations.write().await.remove(message_id).is_some())
    }
}
