//! Consensus scoring - merge candidates into ranked entities.
//!
//! Candidates are partitioned by [`EntityKey`]; each class becomes one
//! [`ResolvedEntity`] whose confidence combines what every contributing source
//! reported, weighted by trust in that source.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::candidate::{Candidate, SourceId};
use crate::types::config::{ConsensusConfig, ResolverConfig};
use crate::types::entity::{EntityKey, ResolvedEntity};

/// Scores candidate sets. Pure; the same input in any order gives the same output.
#[derive(Debug, Clone, Default)]
pub struct ConsensusScorer {
    weights: HashMap<SourceId, f64>,
    config: ConsensusConfig,
}

impl ConsensusScorer {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            weights: HashMap::new(),
            config,
        }
    }

    /// Scorer with the weights of every configured source.
    pub fn from_config(config: &ResolverConfig) -> Self {
        config
            .sources
            .iter()
            .fold(Self::new(config.consensus.clone()), |scorer, source| {
                scorer.with_weight(source.id.as_str(), source.weight)
            })
    }

    pub fn with_weight(mut self, source: impl Into<SourceId>, weight: f64) -> Self {
        self.weights.insert(source.into(), weight.clamp(0.0, 1.0));
        self
    }

    /// Weight of a source, falling back to the default weight.
    pub fn weight(&self, source: &SourceId) -> f64 {
        self.weights
            .get(source)
            .copied()
            .unwrap_or(self.config.default_weight)
    }

    /// Merge candidates into entities, best first.
    ///
    /// Order: aggregate confidence descending, then more contributing sources,
    /// then earliest first retrieval, then canonical id.
    pub fn score(&self, candidates: Vec<Candidate>) -> Vec<ResolvedEntity> {
        let mut classes: BTreeMap<EntityKey, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            classes.entry(candidate.key()).or_default().push(candidate);
        }

        let mut entities: Vec<ResolvedEntity> = classes
            .into_iter()
            .map(|(key, class)| self.merge(key, class))
            .collect();

        entities.sort_by(rank_order);
        entities
    }

    /// Aggregate confidence for per-source effective confidences.
    pub fn aggregate(&self, effective: &[f64]) -> f64 {
        if effective.is_empty() {
            return 0.0;
        }
        let corroboration = (1.0 - self.config.corroboration_bonus.clamp(0.0, 1.0))
            .powi(effective.len() as i32 - 1);
        let doubt: f64 = effective.iter().map(|e| 1.0 - e).product();
        (1.0 - corroboration * doubt).clamp(0.0, 1.0)
    }

    fn merge(&self, key: EntityKey, mut class: Vec<Candidate>) -> ResolvedEntity {
        let cap = self.config.max_source_confidence;

        // Best weighted confidence per source; repeated hits from one source don't corroborate
        let mut per_source: BTreeMap<SourceId, f64> = BTreeMap::new();
        for candidate in &class {
            let effective = (candidate.confidence * self.weight(&candidate.source)).clamp(0.0, cap);
            per_source
                .entry(candidate.source.clone())
                .and_modify(|best| *best = best.max(effective))
                .or_insert(effective);
        }
        let effective: Vec<f64> = per_source.values().copied().collect();

        class.sort_by(representative_order);
        let first_seen = class
            .iter()
            .map(|c| c.retrieved_at)
            .min()
            .unwrap_or_else(chrono::Utc::now);
        let representative = &class[0];
        let status = class.iter().find_map(|c| c.record.status.clone());

        ResolvedEntity {
            canonical_id: key.canonical_id(),
            identifier: match &key {
                EntityKey::Id(id) => Some(id.clone()),
                EntityKey::Name(_) => None,
            },
            canonical_name: representative.record.display_name().to_string(),
            status,
            contributing_sources: per_source.keys().cloned().collect::<BTreeSet<_>>(),
            confidence: self.aggregate(&effective),
            first_seen,
        }
    }
}

fn representative_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.retrieved_at.cmp(&b.retrieved_at))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.record.display_name().cmp(b.record.display_name()))
        .then_with(|| a.record.status.cmp(&b.record.status))
}

/// Final ranking order of resolved entities.
pub fn rank_order(a: &ResolvedEntity, b: &ResolvedEntity) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.source_count().cmp(&a.source_count()))
        .then_with(|| a.first_seen.cmp(&b.first_seen))
        .then_with(|| a.canonical_id.cmp(&b.canonical_id))
}
