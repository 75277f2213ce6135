//! Resolution pipeline.
//!
//! The pipeline orchestrates:
//! - Fan-out of one query to every source under a shared deadline
//! - Consensus scoring of the returned candidates
//! - The decision over the ranked entities, with a last-resort disambiguator

pub mod consensus;
pub mod engine;
pub mod fanout;

pub use consensus::{rank_order, ConsensusScorer};
pub use engine::{decide, Decision, Resolver, ResolverBuilder};
pub use fanout::FanOut;
