//! Last-resort disambiguation trait.
//!
//! Invoked at most once per resolution, only when consensus scoring cannot
//! narrow the ranked list on its own.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{entity::ResolvedEntity, query::Query};

/// What an external decision maker made of a ranked list.
#[derive(Debug, Clone, PartialEq)]
pub enum Disambiguation {
    /// One entity picked from the list
    Chosen(ResolvedEntity),
    /// A shorter list, still ranked, for the user to choose from
    Narrowed(Vec<ResolvedEntity>),
    /// No decision possible
    Undecided,
}

/// External collaborator that narrows a ranked candidate list.
///
/// Returned entities must come from `ranked`; the engine rejects anything else.
#[async_trait]
pub trait Disambiguator: Send + Sync {
    async fn disambiguate(&self, query: &Query, ranked: &[ResolvedEntity]) -> Result<Disambiguation>;
}
