//! Cache trait for prior resolutions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::entity::ResolvedEntity;

/// A cached resolution.
///
/// An entry is never served at or past `expires_at`; an expired entry is
/// treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized query the entry answers
    pub query: String,

    /// Resolved entity (one) or ambiguous list (two to five)
    pub entities: Vec<ResolvedEntity>,

    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry written now.
    pub fn new(query: impl Into<String>, entities: Vec<ResolvedEntity>, ttl: Duration) -> Self {
        Self::written_at(query, entities, Utc::now(), ttl)
    }

    /// Create an entry with an explicit write time.
    pub fn written_at(
        query: impl Into<String>,
        entities: Vec<ResolvedEntity>,
        written_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            query: query.into(),
            entities,
            written_at,
            expires_at: written_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Key/value store for resolutions, addressed by cache key.
///
/// Keys come from [`Query::cache_key`](crate::types::query::Query::cache_key).
/// Backends apply the fixed TTL they were built with; there is no partial
/// invalidation.
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    /// Get a non-expired entry.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store entities for a normalized query, replacing any previous entry.
    async fn put(&self, key: &str, query: &str, entities: Vec<ResolvedEntity>) -> Result<()>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}
