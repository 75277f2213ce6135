//! Resolved entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use super::candidate::SourceId;
use super::query::Identifier;

/// Equivalence key for the same-entity rule.
///
/// Candidates with an identifier are keyed by it alone; candidates without one
/// are keyed by their normalized name. A candidate with an identifier never
/// shares a key with one without.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Id(Identifier),
    Name(String),
}

impl EntityKey {
    pub fn for_parts(identifier: Option<&Identifier>, normalized_name: &str) -> Self {
        match identifier {
            Some(id) => Self::Id(id.clone()),
            None => Self::Name(normalized_name.to_string()),
        }
    }

    /// Stable external identifier for the entity this key denotes.
    pub fn canonical_id(&self) -> String {
        match self {
            Self::Id(id) => format!("ru:{}:{}", id.kind.as_str(), id.value),
            Self::Name(name) => {
                let mut hasher = Sha256::new();
                hasher.update(name.as_bytes());
                let digest = hex::encode(hasher.finalize());
                format!("name:{}", &digest[..16])
            }
        }
    }
}

/// A deduplicated entity produced by consensus scoring or the rule table.
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// `ru:inn:<digits>`, `ru:ogrn:<digits>` or `name:<hash>`
    pub canonical_id: String,

    /// Registry identifier backing the canonical id, if any
    pub identifier: Option<Identifier>,

    /// Display name taken from the strongest contributing record
    pub canonical_name: String,

    /// Registry status if a source reported one
    pub status: Option<String>,

    /// Sources that proposed this entity (never empty)
    pub contributing_sources: BTreeSet<SourceId>,

    /// Aggregate confidence (0.0 - 1.0)
    pub confidence: f64,

    /// Earliest retrieval time among contributing candidates
    pub first_seen: DateTime<Utc>,
}

impl ResolvedEntity {
    /// True when `other` denotes the same entity.
    pub fn same_as(&self, other: &ResolvedEntity) -> bool {
        self.canonical_id == other.canonical_id
    }

    /// True when this entity carries the given identifier.
    pub fn has_identifier(&self, identifier: &Identifier) -> bool {
        self.identifier.as_ref() == Some(identifier)
    }

    /// Number of independent sources that agreed on this entity.
    pub fn source_count(&self) -> usize {
        self.contributing_sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_for_identifier() {
        let key = EntityKey::Id(Identifier::parse("7701234567").unwrap());
        assert_eq!(key.canonical_id(), "ru:inn:7701234567");
    }

    #[test]
    fn test_canonical_id_for_name_is_short_hash() {
        let a = EntityKey::Name("ромашка".into()).canonical_id();
        let b = EntityKey::Name("ромашка".into()).canonical_id();
        let c = EntityKey::Name("лютик".into()).canonical_id();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "name:".len() + 16);
    }

    #[test]
    fn test_identifier_key_never_equals_name_key() {
        let id = Identifier::parse("7701234567").unwrap();
        let with_id = EntityKey::for_parts(Some(&id), "ромашка");
        let without = EntityKey::for_parts(None, "ромашка");
        assert_ne!(with_id, without);
    }
}
