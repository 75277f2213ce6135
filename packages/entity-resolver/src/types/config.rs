//! Configuration types for sources, fan-out, consensus and decisions.
//!
//! Loaded once at process start, either built in code or read from
//! `RESOLVER_*` environment variables via [`ResolverConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ResolverError, Result};
use crate::types::outcome::{MAX_AMBIGUOUS, MIN_AMBIGUOUS};

/// Longest fan-out deadline `validate` accepts.
pub const MAX_FANOUT_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Per-source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source identifier (matches `EntitySource::id`)
    pub id: String,

    /// Disabled sources are never queried.
    pub enabled: bool,

    /// Trust in this source relative to others (0.0 - 1.0).
    pub weight: f64,

    /// Minimum delay between two requests to this source, in milliseconds.
    ///
    /// Enforced globally per source, across concurrent resolutions.
    pub min_interval_ms: u64,
}

impl SourceSettings {
    pub fn new(id: impl Into<String>, weight: f64, min_interval_ms: u64) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            weight,
            min_interval_ms,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Overall deadline for one dispatch, in milliseconds.
    pub deadline_ms: u64,

    /// Retries allowed for a source that returned a soft error.
    ///
    /// Default: 2.
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry.
    pub backoff_base_ms: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 20_000,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl FanOutConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff_base(mut self, backoff: Duration) -> Self {
        self.backoff_base_ms = backoff.as_millis() as u64;
        self
    }
}

/// Consensus scoring knobs.
///
/// Aggregate confidence of an entity backed by `n` distinct sources is
/// `1 - (1 - corroboration_bonus)^(n - 1) * Π (1 - e_s)`, where
/// `e_s = min(max_source_confidence, confidence * weight)` per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Extra doubt removed for each corroborating source. Must be above 0 so
    /// that a zero-weight source still corroborates.
    ///
    /// Default: 0.1.
    pub corroboration_bonus: f64,

    /// Cap on a single source's effective confidence, keeping the aggregate
    /// strictly increasing with corroboration.
    ///
    /// Default: 0.99.
    pub max_source_confidence: f64,

    /// Weight of a source with no configured weight.
    ///
    /// Default: 0.5.
    pub default_weight: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            corroboration_bonus: 0.1,
            max_source_confidence: 0.99,
            default_weight: 0.5,
        }
    }
}

/// Thresholds for turning a ranked entity list into a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// The top entity must reach this score to resolve on its own.
    ///
    /// Default: 0.5.
    pub min_confidence: f64,

    /// Entities scoring within this distance of the top are contenders.
    ///
    /// Default: 0.15.
    pub ambiguity_band: f64,

    /// Largest list returned as Ambiguous, at most 5.
    ///
    /// Default: 5.
    pub max_ambiguous: usize,

    /// How many ranked entities the last-resort disambiguator receives.
    ///
    /// Default: 10.
    pub disambiguation_limit: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            ambiguity_band: 0.15,
            max_ambiguous: 5,
            disambiguation_limit: 10,
        }
    }
}

/// Complete resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub sources: Vec<SourceSettings>,
    pub fanout: FanOutConfig,
    pub consensus: ConsensusConfig,
    pub decision: DecisionConfig,

    /// Lifetime of cached resolutions, in seconds.
    ///
    /// Default: 86400 (24 hours).
    pub cache_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            fanout: FanOutConfig::default(),
            consensus: ConsensusConfig::default(),
            decision: DecisionConfig::default(),
            cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Known sources with their default weights and request intervals.
pub fn default_sources() -> Vec<SourceSettings> {
    vec![
        SourceSettings::new("fns", 1.0, 2_000),
        SourceSettings::new("kontur", 0.9, 1_000),
        SourceSettings::new("hh", 0.7, 1_000),
    ]
}

impl ResolverConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `RESOLVER_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are errors.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.fanout.deadline_ms = env_or("RESOLVER_FANOUT_DEADLINE_MS", config.fanout.deadline_ms)?;
        config.fanout.max_retries = env_or("RESOLVER_MAX_RETRIES", config.fanout.max_retries)?;
        config.fanout.backoff_base_ms =
            env_or("RESOLVER_BACKOFF_BASE_MS", config.fanout.backoff_base_ms)?;
        config.cache_ttl_secs = env_or("RESOLVER_CACHE_TTL_SECS", config.cache_ttl_secs)?;
        config.decision.ambiguity_band =
            env_or("RESOLVER_AMBIGUITY_BAND", config.decision.ambiguity_band)?;
        config.decision.min_confidence =
            env_or("RESOLVER_MIN_CONFIDENCE", config.decision.min_confidence)?;
        config.consensus.corroboration_bonus =
            env_or("RESOLVER_CORROBORATION_BONUS", config.consensus.corroboration_bonus)?;

        for source in &mut config.sources {
            let prefix = format!("RESOLVER_SOURCE_{}", source.id.to_uppercase());
            source.enabled = env_or(&format!("{}_ENABLED", prefix), source.enabled)?;
            source.weight = env_or(&format!("{}_WEIGHT", prefix), source.weight)?;
            source.min_interval_ms =
                env_or(&format!("{}_MIN_INTERVAL_MS", prefix), source.min_interval_ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        for source in &self.sources {
            if !(0.0..=1.0).contains(&source.weight) {
                return Err(ResolverError::Config(format!(
                    "weight for source {} must be within 0..=1, got {}",
                    source.id, source.weight
                )));
            }
        }
        if self.fanout.deadline_ms == 0 {
            return Err(ResolverError::Config("fan-out deadline must be positive".into()));
        }
        if self.fanout.deadline() > MAX_FANOUT_DEADLINE {
            return Err(ResolverError::Config(format!(
                "fan-out deadline must not exceed {}s, got {}ms",
                MAX_FANOUT_DEADLINE.as_secs(),
                self.fanout.deadline_ms
            )));
        }
        if self.fanout.backoff_base() > MAX_FANOUT_DEADLINE {
            return Err(ResolverError::Config("backoff base must not exceed the deadline ceiling".into()));
        }
        if !(0.0..=1.0).contains(&self.decision.min_confidence) {
            return Err(ResolverError::Config("min_confidence must be within 0..=1".into()));
        }
        if self.decision.ambiguity_band < 0.0 {
            return Err(ResolverError::Config("ambiguity_band must not be negative".into()));
        }
        if !(MIN_AMBIGUOUS..=MAX_AMBIGUOUS).contains(&self.decision.max_ambiguous) {
            return Err(ResolverError::Config(format!(
                "max_ambiguous must be within {}..={}, got {}",
                MIN_AMBIGUOUS, MAX_AMBIGUOUS, self.decision.max_ambiguous
            )));
        }
        let bonus = self.consensus.corroboration_bonus;
        if !(bonus > 0.0 && bonus < 1.0) {
            return Err(ResolverError::Config(
                "corroboration_bonus must be within 0..1, exclusive".into(),
            ));
        }
        let cap = self.consensus.max_source_confidence;
        if !(cap > 0.0 && cap < 1.0) {
            return Err(ResolverError::Config(
                "max_source_confidence must be within 0..1, exclusive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus.default_weight) {
            return Err(ResolverError::Config("default_weight must be within 0..=1".into()));
        }
        Ok(())
    }

    /// Settings for one source, if configured.
    pub fn source(&self, id: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// True when the source is configured and enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.source(id).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn with_source(mut self, settings: SourceSettings) -> Self {
        self.sources.retain(|s| s.id != settings.id);
        self.sources.push(settings);
        self
    }

    pub fn with_fanout(mut self, fanout: FanOutConfig) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_decision(mut self, decision: DecisionConfig) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ResolverError::Config(format!("{} is invalid: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_source_weights() {
        let config = ResolverConfig::default();
        assert_eq!(config.source("fns").map(|s| s.weight), Some(1.0));
        assert_eq!(config.source("fns").map(|s| s.min_interval_ms), Some(2_000));
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.fanout.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_source_replaces_existing() {
        let config = ResolverConfig::default()
            .with_source(SourceSettings::new("fns", 0.8, 3_000).with_enabled(false));
        assert_eq!(config.sources.iter().filter(|s| s.id == "fns").count(), 1);
        assert!(!config.is_enabled("fns"));
        assert!(config.is_enabled("kontur"));
        assert!(!config.is_enabled("unknown"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ResolverConfig::default().with_source(SourceSettings::new("fns", 1.5, 0));
        assert!(matches!(config.validate(), Err(ResolverError::Config(_))));

        let config = ResolverConfig::default().with_decision(DecisionConfig {
            max_ambiguous: 1,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_ambiguous_above_five_rejected() {
        for max_ambiguous in [6, 8, usize::MAX] {
            let config = ResolverConfig::default().with_decision(DecisionConfig {
                max_ambiguous,
                ..Default::default()
            });
            assert!(matches!(config.validate(), Err(ResolverError::Config(_))));
        }

        let config = ResolverConfig::default().with_decision(DecisionConfig {
            max_ambiguous: 3,
            ..Default::default()
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deadline_ceiling() {
        let huge = ResolverConfig {
            fanout: FanOutConfig {
                deadline_ms: u64::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(huge.validate(), Err(ResolverError::Config(_))));

        let at_ceiling = ResolverConfig::default()
            .with_fanout(FanOutConfig::default().with_deadline(MAX_FANOUT_DEADLINE));
        assert!(at_ceiling.validate().is_ok());

        let slow_backoff = ResolverConfig {
            fanout: FanOutConfig {
                backoff_base_ms: u64::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(slow_backoff.validate().is_err());
    }

    #[test]
    fn test_corroboration_bonus_must_be_positive() {
        let zero = ResolverConfig::default().with_consensus(ConsensusConfig {
            corroboration_bonus: 0.0,
            ..Default::default()
        });
        assert!(matches!(zero.validate(), Err(ResolverError::Config(_))));

        let full_cap = ResolverConfig::default().with_consensus(ConsensusConfig {
            max_source_confidence: 1.0,
            ..Default::default()
        });
        assert!(full_cap.validate().is_err());
    }

    // Env vars are process-global; keep every from_env case in this one test.
    #[test]
    fn test_from_env_overrides_and_rejects_garbage() {
        env::set_var("RESOLVER_SOURCE_HH_WEIGHT", "0.25");
        env::set_var("RESOLVER_SOURCE_HH_ENABLED", "false");
        let config = ResolverConfig::from_env().unwrap();
        env::remove_var("RESOLVER_SOURCE_HH_WEIGHT");
        env::remove_var("RESOLVER_SOURCE_HH_ENABLED");

        assert_eq!(config.source("hh").map(|s| s.weight), Some(0.25));
        assert!(!config.is_enabled("hh"));

        env::set_var("RESOLVER_SOURCE_KONTUR_MIN_INTERVAL_MS", "soon");
        let result = ResolverConfig::from_env();
        env::remove_var("RESOLVER_SOURCE_KONTUR_MIN_INTERVAL_MS");

        assert!(matches!(result, Err(ResolverError::Config(_))));
    }
}
