//! Candidate types - raw source records and their normalized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::EntityKey;
use super::query::Identifier;

/// Identifier of a configured source (e.g. "fns", "kontur").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Fields as a source returned them, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name_full: Option<String>,
    pub name_short: Option<String>,
    pub inn: Option<String>,
    pub ogrn: Option<String>,
    pub status: Option<String>,

    /// Anything else the source returned that may help a human disambiguate
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl RawRecord {
    /// Create a record with a full name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name_full: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_short_name(mut self, name: impl Into<String>) -> Self {
        self.name_short = Some(name.into());
        self
    }

    pub fn with_inn(mut self, inn: impl Into<String>) -> Self {
        self.inn = Some(inn.into());
        self
    }

    pub fn with_ogrn(mut self, ogrn: impl Into<String>) -> Self {
        self.ogrn = Some(ogrn.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }

    /// Best human-readable name: full name, else short name.
    pub fn display_name(&self) -> &str {
        self.name_full
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.name_short.as_deref())
            .unwrap_or("")
    }
}

/// One source's proposed match for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source that produced this candidate
    pub source: SourceId,

    /// Fields as returned by the source
    pub record: RawRecord,

    /// Normalized display name
    pub normalized_name: String,

    /// Registry identifier, if the record carried one
    pub identifier: Option<Identifier>,

    /// Confidence reported for this candidate (0.0 - 1.0)
    pub confidence: f64,

    /// When the source returned it
    pub retrieved_at: DateTime<Utc>,
}

impl Candidate {
    /// Normalize a raw record into a candidate.
    pub fn new(source: impl Into<SourceId>, record: RawRecord, confidence: f64) -> Self {
        crate::normalize::normalize_candidate(source.into(), record, confidence)
    }

    pub fn with_retrieved_at(mut self, retrieved_at: DateTime<Utc>) -> Self {
        self.retrieved_at = retrieved_at;
        self
    }

    /// Equivalence key under the same-entity rule.
    pub fn key(&self) -> EntityKey {
        EntityKey::for_parts(self.identifier.as_ref(), &self.normalized_name)
    }
}
