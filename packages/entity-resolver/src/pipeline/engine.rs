//! Resolution engine - drives one query from cache check to a terminal result.
//!
//! ```text
//! CacheCheck -> RuleShortcut -> FanOut -> Consensus -> Decision
//!                                                      |- Resolved / Ambiguous / NotFound
//!                                                      '- LastResort -> Resolved / Ambiguous / Failed
//! ```
//!
//! Resolved and Ambiguous results are cached; NotFound and Failed never are.

use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::consensus::ConsensusScorer;
use super::fanout::FanOut;
use crate::error::Result;
use crate::rules::RuleTable;
use crate::sources::rate_limited::{RateLimitedSource, RequestGate};
use crate::stores::MemoryCache;
use crate::traits::{
    cache::ResolutionCache,
    disambiguator::{Disambiguation, Disambiguator},
    source::EntitySource,
};
use crate::types::{
    config::{DecisionConfig, ResolverConfig},
    entity::ResolvedEntity,
    outcome::{FailureReason, ResolutionResult, MAX_AMBIGUOUS, MIN_AMBIGUOUS},
    query::{Identifier, Query},
};

/// What consensus alone makes of a ranked list.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Terminal without further help
    Final(ResolutionResult),
    /// Needs the last-resort disambiguator; carries the list it should see
    LastResort(Vec<ResolvedEntity>),
}

/// Decide on a ranked entity list (best first).
///
/// 1. No entities is NotFound; a single entity resolves.
/// 2. A query identifier carried by exactly one entity pins that entity.
/// 3. Entities within `ambiguity_band` of the top score are contenders.
/// 4. A lone contender resolves if it reaches `min_confidence`.
/// 5. Two to `max_ambiguous` contenders are Ambiguous.
/// 6. Anything else goes to the last resort with the top `disambiguation_limit`.
pub fn decide(
    mut ranked: Vec<ResolvedEntity>,
    identifier: Option<&Identifier>,
    config: &DecisionConfig,
) -> Decision {
    match ranked.len() {
        0 => return Decision::Final(ResolutionResult::NotFound),
        1 => return Decision::Final(ResolutionResult::Resolved(ranked.remove(0))),
        _ => {}
    }

    if let Some(id) = identifier {
        let mut pinned = ranked.iter().filter(|e| e.has_identifier(id));
        if let (Some(entity), None) = (pinned.next(), pinned.next()) {
            return Decision::Final(ResolutionResult::Resolved(entity.clone()));
        }
    }

    let top = ranked[0].confidence;
    let contenders = ranked
        .iter()
        .take_while(|e| e.confidence >= top - config.ambiguity_band)
        .count();

    if contenders == 1 && top >= config.min_confidence {
        return Decision::Final(ResolutionResult::Resolved(ranked.remove(0)));
    }
    if (MIN_AMBIGUOUS..=config.max_ambiguous.min(MAX_AMBIGUOUS)).contains(&contenders) {
        ranked.truncate(contenders);
        return Decision::Final(ResolutionResult::Ambiguous(ranked));
    }

    ranked.truncate(config.disambiguation_limit.max(1));
    Decision::LastResort(ranked)
}

/// The resolution engine.
///
/// Owns its sources (and their request gates), so the per-source intervals
/// hold across every resolution run through one `Resolver`.
pub struct Resolver {
    cache: Arc<dyn ResolutionCache>,
    rules: RuleTable,
    fanout: FanOut,
    scorer: ConsensusScorer,
    disambiguator: Option<Arc<dyn Disambiguator>>,
    decision: DecisionConfig,
}

impl Resolver {
    pub fn builder(config: ResolverConfig) -> ResolverBuilder {
        ResolverBuilder::new(config)
    }

    /// Resolve a raw query. Never fails: collaborator errors end in `Failed`
    /// or degrade to fewer candidates.
    pub async fn resolve(&self, raw_query: &str) -> ResolutionResult {
        let query = Query::new(raw_query);
        let resolution_id = Uuid::new_v4();
        let span = info_span!(
            "resolve",
            resolution_id = %resolution_id,
            query = %query.normalized()
        );

        async {
            let result = self.run(&query).await;
            info!(result = result.label(), "resolution finished");
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &Query) -> ResolutionResult {
        if query.is_empty() {
            debug!("nothing to search for");
            return ResolutionResult::NotFound;
        }

        let key = query.cache_key();
        if let Some(result) = self.cached(&key).await {
            debug!(result = result.label(), "cache hit");
            return result;
        }

        let result = match self.rules.lookup(query) {
            Some(entity) => {
                debug!(canonical_id = %entity.canonical_id, "rule table hit");
                ResolutionResult::Resolved(entity.clone())
            }
            None => self.resolve_remote(query).await,
        };

        if let Some(entities) = result.cacheable_entities() {
            if let Err(e) = self.cache.put(&key, query.normalized(), entities).await {
                warn!(error = %e, "cache write failed");
            }
        }
        result
    }

    /// Cached result, if a usable one exists.
    async fn cached(&self, key: &str) -> Option<ResolutionResult> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        if entry.is_expired() || entry.entities.is_empty() {
            return None;
        }
        let count = entry.entities.len();
        let result = ResolutionResult::collapse(entry.entities, self.decision.max_ambiguous);
        if result.is_none() {
            debug!(entities = count, "cached entry out of bounds, ignoring");
        }
        result
    }

    async fn resolve_remote(&self, query: &Query) -> ResolutionResult {
        let reports = self.fanout.dispatch(query).await;
        let candidates: Vec<_> = reports
            .into_iter()
            .flat_map(|report| report.into_candidates())
            .collect();
        debug!(candidates = candidates.len(), "scoring candidates");

        let ranked = self.scorer.score(candidates);
        match decide(ranked, query.identifier(), &self.decision) {
            Decision::Final(result) => result,
            Decision::LastResort(ranked) => self.last_resort(query, ranked).await,
        }
    }

    async fn last_resort(&self, query: &Query, ranked: Vec<ResolvedEntity>) -> ResolutionResult {
        let Some(disambiguator) = &self.disambiguator else {
            debug!(entities = ranked.len(), "no disambiguator configured");
            return ResolutionResult::Failed(FailureReason::DisambiguationUnavailable);
        };

        debug!(entities = ranked.len(), "asking last-resort disambiguator");
        let listed = |entity: &ResolvedEntity| ranked.iter().find(|r| r.same_as(entity)).cloned();

        match disambiguator.disambiguate(query, &ranked).await {
            Ok(Disambiguation::Chosen(entity)) => match listed(&entity) {
                Some(entity) => ResolutionResult::Resolved(entity),
                None => ResolutionResult::Failed(FailureReason::Inconsistent(format!(
                    "chosen entity {} was not offered",
                    entity.canonical_id
                ))),
            },
            Ok(Disambiguation::Narrowed(entities)) => {
                let mut narrowed = Vec::with_capacity(entities.len());
                for entity in &entities {
                    match listed(entity) {
                        Some(entity) if !narrowed.iter().any(|n: &ResolvedEntity| n.same_as(&entity)) => {
                            narrowed.push(entity)
                        }
                        Some(_) => {}
                        None => {
                            return ResolutionResult::Failed(FailureReason::Inconsistent(format!(
                                "narrowed list holds {} which was not offered",
                                entity.canonical_id
                            )))
                        }
                    }
                }
                // Keep consensus order regardless of how the list came back
                narrowed.sort_by_key(|n| ranked.iter().position(|r| r.same_as(n)));

                if narrowed.is_empty() {
                    return ResolutionResult::Failed(FailureReason::DisambiguationFailed(
                        "no options left".into(),
                    ));
                }
                let count = narrowed.len();
                ResolutionResult::collapse(narrowed, self.decision.max_ambiguous).unwrap_or_else(|| {
                    ResolutionResult::Failed(FailureReason::DisambiguationFailed(format!(
                        "narrowed to {} options",
                        count
                    )))
                })
            }
            Ok(Disambiguation::Undecided) => {
                ResolutionResult::Failed(FailureReason::DisambiguationFailed("undecided".into()))
            }
            Err(e) => {
                warn!(error = %e, "disambiguation failed");
                ResolutionResult::Failed(FailureReason::DisambiguationFailed(e.to_string()))
            }
        }
    }
}

/// Builder for [`Resolver`].
pub struct ResolverBuilder {
    config: ResolverConfig,
    fanout: FanOut,
    cache: Option<Arc<dyn ResolutionCache>>,
    rules: RuleTable,
    disambiguator: Option<Arc<dyn Disambiguator>>,
}

impl ResolverBuilder {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            fanout: FanOut::new(config.fanout.clone()),
            config,
            cache: None,
            rules: RuleTable::new(),
            disambiguator: None,
        }
    }

    /// Add a source, applying its configured settings.
    ///
    /// Sources without settings and disabled sources are left out. A
    /// configured minimum interval puts the source behind a request gate,
    /// per request when the adapter paces itself, otherwise per fetch.
    pub fn source<S: EntitySource + 'static>(mut self, mut source: S) -> Self {
        let id = source.id();
        match self.config.source(id.as_str()) {
            None => {
                warn!(source = %id, "source has no settings, leaving it out");
            }
            Some(settings) if !settings.enabled => {
                debug!(source = %id, "source disabled");
            }
            Some(settings) if settings.min_interval_ms > 0 => {
                let gate = RequestGate::new(settings.min_interval());
                if source.pace_requests(gate.clone()) {
                    self.fanout.add_source(Arc::new(source));
                } else {
                    self.fanout
                        .add_source(Arc::new(RateLimitedSource::with_gate(source, gate)));
                }
            }
            Some(_) => self.fanout.add_source(Arc::new(source)),
        }
        self
    }

    /// Number of sources that will be queried.
    pub fn source_count(&self) -> usize {
        self.fanout.len()
    }

    pub fn cache(mut self, cache: impl ResolutionCache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn shared_cache(mut self, cache: Arc<dyn ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn disambiguator(mut self, disambiguator: impl Disambiguator + 'static) -> Self {
        self.disambiguator = Some(Arc::new(disambiguator));
        self
    }

    pub fn shared_disambiguator(mut self, disambiguator: Arc<dyn Disambiguator>) -> Self {
        self.disambiguator = Some(disambiguator);
        self
    }

    /// Validate the configuration and build. Without an explicit cache, an
    /// in-memory one with the configured TTL is used.
    pub fn build(self) -> Result<Resolver> {
        self.config.validate()?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(MemoryCache::new(chrono::Duration::seconds(
                self.config.cache_ttl_secs as i64,
            ))),
        };

        Ok(Resolver {
            cache,
            rules: self.rules,
            fanout: self.fanout,
            scorer: ConsensusScorer::from_config(&self.config),
            disambiguator: self.disambiguator,
            decision: self.config.decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::candidate::SourceId;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn entity(inn: &str, confidence: f64) -> ResolvedEntity {
        ResolvedEntity {
            canonical_id: format!("ru:inn:{}", inn),
            identifier: Identifier::parse(inn),
            canonical_name: format!("Компания {}", inn),
            status: None,
            contributing_sources: BTreeSet::from([SourceId::new("fns")]),
            confidence,
            first_seen: Utc::now(),
        }
    }

    fn ids(entities: &[ResolvedEntity]) -> Vec<&str> {
        entities.iter().map(|e| e.canonical_id.as_str()).collect()
    }

    #[test]
    fn test_empty_and_single() {
        let config = DecisionConfig::default();
        assert_eq!(decide(vec![], None, &config), Decision::Final(ResolutionResult::NotFound));

        // A single entity resolves even below the minimum confidence
        let low = entity("7700000001", 0.1);
        assert_eq!(
            decide(vec![low.clone()], None, &config),
            Decision::Final(ResolutionResult::Resolved(low))
        );
    }

    #[test]
    fn test_clear_winner_resolves() {
        let ranked = vec![entity("7700000001", 0.95), entity("7700000002", 0.4)];
        match decide(ranked, None, &DecisionConfig::default()) {
            Decision::Final(ResolutionResult::Resolved(e)) => assert_eq!(e.canonical_id, "ru:inn:7700000001"),
            other => panic!("expected resolved, got {:?}", other),
        }
    }

    #[test]
    fn test_close_contenders_are_ambiguous() {
        let ranked = vec![
            entity("7700000001", 0.40),
            entity("7700000002", 0.38),
            entity("7700000003", 0.35),
            entity("7700000004", 0.10),
        ];
        match decide(ranked, None, &DecisionConfig::default()) {
            Decision::Final(ResolutionResult::Ambiguous(list)) => {
                assert_eq!(ids(&list), vec!["ru:inn:7700000001", "ru:inn:7700000002", "ru:inn:7700000003"]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_lone_weak_top_goes_to_last_resort() {
        let ranked = vec![entity("7700000001", 0.45), entity("7700000002", 0.1)];
        assert!(matches!(
            decide(ranked, None, &DecisionConfig::default()),
            Decision::LastResort(list) if list.len() == 2
        ));
    }

    #[test]
    fn test_too_many_contenders_goes_to_last_resort_capped() {
        let ranked: Vec<_> = (0..12)
            .map(|i| entity(&format!("77000000{:02}", i), 0.5 - i as f64 * 0.001))
            .collect();
        match decide(ranked, None, &DecisionConfig::default()) {
            Decision::LastResort(list) => assert_eq!(list.len(), 10),
            other => panic!("expected last resort, got {:?}", other),
        }
    }

    #[test]
    fn test_query_identifier_pins_entity() {
        let ranked = vec![
            entity("7700000001", 0.40),
            entity("7700000002", 0.39),
            entity("7700000003", 0.38),
        ];
        let id = Identifier::parse("7700000003").unwrap();
        match decide(ranked, Some(&id), &DecisionConfig::default()) {
            Decision::Final(ResolutionResult::Resolved(e)) => assert_eq!(e.canonical_id, "ru:inn:7700000003"),
            other => panic!("expected pinned entity, got {:?}", other),
        }
    }

    #[test]
    fn test_unmatched_identifier_falls_through() {
        let ranked = vec![entity("7700000001", 0.40), entity("7700000002", 0.39)];
        let id = Identifier::parse("7709999999").unwrap();
        assert!(matches!(
            decide(ranked, Some(&id), &DecisionConfig::default()),
            Decision::Final(ResolutionResult::Ambiguous(list)) if list.len() == 2
        ));
    }
}
