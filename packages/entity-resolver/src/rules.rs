//! Static rule table: known aliases that resolve without any network call.
//!
//! Loaded from a JSON array of entries:
//!
//! ```json
//! [
//!   { "aliases": ["ecom.tech", "ecomtech"], "name": "ООО \"Умное пространство\"",
//!     "inn": "7811554010", "ogrn": "1137847232852", "status": "ACTIVE" }
//! ]
//! ```
//!
//! Aliases, the entry name and its identifiers are all matched after
//! normalization, so `ECOM.TECH` and `ecom tech` hit the same entry.

use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

use crate::error::{ResolverError, Result};
use crate::normalize::normalize_name;
use crate::types::candidate::SourceId;
use crate::types::entity::{EntityKey, ResolvedEntity};
use crate::types::query::{Identifier, IdentifierKind, Query};

/// Source id recorded on rule-table entities.
pub const RULES_SOURCE_ID: &str = "rules";

/// One entry as written in the rules file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub ogrn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RuleEntry {
    fn identifiers(&self) -> Result<Vec<Identifier>> {
        let mut ids = Vec::new();
        for (value, kind) in [(&self.inn, IdentifierKind::Inn), (&self.ogrn, IdentifierKind::Ogrn)] {
            if let Some(value) = value {
                let id = Identifier::parse_as(kind, value.trim()).ok_or_else(|| ResolverError::Rules {
                    reason: format!("{:?} is not a valid {} for {:?}", value, kind.as_str(), self.name),
                })?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn into_entity(self, ids: &[Identifier]) -> ResolvedEntity {
        // INN first, matching the same-entity rule
        let identifier = ids.first().cloned();
        let key = EntityKey::for_parts(identifier.as_ref(), &normalize_name(&self.name));
        ResolvedEntity {
            canonical_id: key.canonical_id(),
            identifier,
            canonical_name: self.name,
            status: self.status,
            contributing_sources: BTreeSet::from([SourceId::new(RULES_SOURCE_ID)]),
            confidence: 1.0,
            first_seen: Utc::now(),
        }
    }
}

/// Alias lookup table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    by_alias: HashMap<String, ResolvedEntity>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting bad identifiers and aliases claimed by two entities.
    pub fn from_entries(entries: Vec<RuleEntry>) -> Result<Self> {
        let mut by_alias: HashMap<String, ResolvedEntity> = HashMap::new();

        for entry in entries {
            let ids = entry.identifiers()?;
            let mut keys: Vec<String> = entry
                .aliases
                .iter()
                .chain(std::iter::once(&entry.name))
                .map(|alias| normalize_name(alias))
                .collect();
            keys.extend(ids.iter().map(|id| id.value.clone()));
            keys.retain(|key| !key.is_empty());

            let entity = entry.into_entity(&ids);
            for key in keys {
                if let Some(existing) = by_alias.get(&key) {
                    if !existing.same_as(&entity) {
                        return Err(ResolverError::Rules {
                            reason: format!(
                                "alias {:?} maps to both {} and {}",
                                key, existing.canonical_id, entity.canonical_id
                            ),
                        });
                    }
                    continue;
                }
                by_alias.insert(key, entity.clone());
            }
        }

        Ok(Self { by_alias })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<RuleEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    /// Load a rules file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json(&json)?;
        debug!(path = %path.display(), aliases = table.len(), "loaded rule table");
        Ok(table)
    }

    /// Entity for an exact normalized-query match.
    pub fn lookup(&self, query: &Query) -> Option<&ResolvedEntity> {
        self.by_alias.get(query.normalized())
    }

    /// Number of distinct aliases.
    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}
