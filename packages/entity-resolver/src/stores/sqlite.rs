//! SQLite resolution cache.
//!
//! Entries survive restarts, so a resolver process can be restarted without
//! re-querying every source for recent lookups.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::error::{ResolverError, Result};
use crate::traits::cache::{CacheEntry, ResolutionCache};
use crate::types::entity::ResolvedEntity;

/// SQLite-backed cache with a fixed TTL.
pub struct SqliteCache {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteCache {
    /// Connect and create the table if needed.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://./resolver.db?mode=rwc` - File-based, created if missing
    pub async fn new(database_url: &str, ttl: Duration) -> Result<Self> {
        Self::connect(database_url, ttl, 5).await
    }

    /// In-memory cache (for testing). One connection, so every query sees the
    /// same database.
    pub async fn in_memory(ttl: Duration) -> Result<Self> {
        Self::connect("sqlite::memory:", ttl, 1).await
    }

    async fn connect(database_url: &str, ttl: Duration, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(ResolverError::cache)?;

        let cache = Self { pool, ttl };
        cache.run_migrations().await?;
        Ok(cache)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resolution_cache (
                key TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                entities TEXT NOT NULL,
                written_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_resolution_cache_expires_at ON resolution_cache(expires_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ResolverError::cache)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a prepared entry as is.
    pub async fn put_entry(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let entities = serde_json::to_string(&entry.entities)?;

        sqlx::query(
            r#"
            INSERT INTO resolution_cache (key, query, entities, written_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                query = excluded.query,
                entities = excluded.entities,
                written_at = excluded.written_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(&entry.query)
        .bind(entities)
        .bind(entry.written_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(ResolverError::cache)?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    query: String,
    entities: String,
    written_at: i64,
    expires_at: i64,
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ResolverError::Cache(format!("invalid cache timestamp: {}", millis).into()))
}

impl EntryRow {
    fn into_entry(self) -> Result<CacheEntry> {
        let entities: Vec<ResolvedEntity> = serde_json::from_str(&self.entities)?;
        Ok(CacheEntry {
            query: self.query,
            entities,
            written_at: from_millis(self.written_at)?,
            expires_at: from_millis(self.expires_at)?,
        })
    }
}

#[async_trait]
impl ResolutionCache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            "SELECT query, entities, written_at, expires_at FROM resolution_cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(ResolverError::cache)?;

        match row {
            Some(r) => Ok(Some(r.into_entry()?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, query: &str, entities: Vec<ResolvedEntity>) -> Result<()> {
        let entry = CacheEntry::new(query, entities, self.ttl);
        self.put_entry(key, &entry).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM resolution_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(ResolverError::cache)?;

        Ok(result.rows_affected() as usize)
    }
}
