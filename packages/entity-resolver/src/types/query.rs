//! Query types - normalized queries and registry identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of registry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Taxpayer number (10 digits for companies, 12 for individuals)
    Inn,
    /// State registration number (13 digits for companies, 15 for individuals)
    Ogrn,
}

impl IdentifierKind {
    /// Classify a digit run by its length.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            10 | 12 => Some(Self::Inn),
            13 | 15 => Some(Self::Ogrn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inn => "inn",
            Self::Ogrn => "ogrn",
        }
    }
}

/// A registry identifier extracted from a query or a source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    /// Parse a bare digit string, classifying it by length.
    ///
    /// Returns None for anything that is not all ASCII digits of a known length.
    pub fn parse(digits: &str) -> Option<Self> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        IdentifierKind::from_len(digits.len()).map(|kind| Self {
            kind,
            value: digits.to_string(),
        })
    }

    /// Parse a value that must be of the given kind.
    pub fn parse_as(kind: IdentifierKind, digits: &str) -> Option<Self> {
        Self::parse(digits).filter(|id| id.kind == kind)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// A user query in raw and normalized form.
///
/// Immutable once created; build one with [`Query::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    raw: String,
    normalized: String,
    identifier: Option<Identifier>,
}

impl Query {
    /// Normalize a raw query.
    pub fn new(raw: impl Into<String>) -> Self {
        crate::normalize::normalize_query(raw)
    }

    pub(crate) fn from_parts(
        raw: String,
        normalized: String,
        identifier: Option<Identifier>,
    ) -> Self {
        Self {
            raw,
            normalized,
            identifier,
        }
    }

    /// The query exactly as the caller sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Case-folded query with legal forms and punctuation removed.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Registry identifier found in the query, if any.
    pub fn identifier(&self) -> Option<&Identifier> {
        self.identifier.as_ref()
    }

    /// True when there is nothing left to search for.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty() && self.identifier.is_none()
    }

    /// Key used to address cached resolutions for this query.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized.as_bytes());
        format!("entity:{}", hex::encode(hasher.finalize()))
    }

    /// Text to send to a source: the identifier when present, otherwise the
    /// raw query trimmed.
    pub fn search_text(&self) -> &str {
        match &self.identifier {
            Some(id) => &id.value,
            None => self.raw.trim(),
        }
    }
}
