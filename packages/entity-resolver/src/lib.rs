//! Multi-source legal entity lookup.
//!
//! Resolves a free-text company name or registry number to one legal entity
//! by querying several independent sources concurrently, merging what they
//! return by consensus, and asking an external disambiguator only when
//! consensus cannot decide.
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_resolver::{Resolver, ResolverConfig, ResolutionResult};
//! use entity_resolver::sources::{FnsSource, HhSource, SourceHttp};
//!
//! let config = ResolverConfig::from_env()?;
//! let http = SourceHttp::new("entity-resolver/0.1")?;
//!
//! let resolver = Resolver::builder(config)
//!     .source(FnsSource::new(http.clone(), "https://egrul.nalog.ru"))
//!     .source(HhSource::new(http))
//!     .build()?;
//!
//! match resolver.resolve("ООО Ромашка").await {
//!     ResolutionResult::Resolved(entity) => println!("{}", entity.canonical_id),
//!     ResolutionResult::Ambiguous(options) => println!("{} options", options.len()),
//!     other => println!("{}", other.label()),
//! }
//! ```

pub mod disambiguators;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod sources;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ResolverError, Result};
pub use pipeline::{ConsensusScorer, FanOut, Resolver, ResolverBuilder};
pub use rules::RuleTable;
pub use traits::{
    cache::{CacheEntry, ResolutionCache},
    disambiguator::{Disambiguation, Disambiguator},
    source::EntitySource,
};
pub use types::{
    candidate::{Candidate, RawRecord, SourceId},
    config::{ConsensusConfig, DecisionConfig, FanOutConfig, ResolverConfig, SourceSettings},
    entity::{EntityKey, ResolvedEntity},
    outcome::{FailureReason, HardErrorKind, ResolutionResult, SoftErrorKind, SourceOutcome, SourceReport},
    query::{Identifier, IdentifierKind, Query},
};

// Re-export stores
pub use stores::MemoryCache;

#[cfg(feature = "sqlite")]
pub use stores::SqliteCache;
