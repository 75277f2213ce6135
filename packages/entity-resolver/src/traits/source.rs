//! Source trait - the uniform contract every external source satisfies.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::sources::rate_limited::RequestGate;
use crate::types::{candidate::SourceId, outcome::SourceOutcome, query::Query};

/// An external, independently operated provider of entity data.
///
/// Implementations wrap one source's fetch and parse logic. They must classify
/// every failure into a [`SourceOutcome`] variant and never panic past this
/// boundary:
/// - timeouts, network failures, malformed bodies and generic HTTP errors are
///   soft errors (retryable);
/// - access-denied, blocked and rate-limit responses are hard errors (never
///   retried within the same resolution).
///
/// # Implementations
///
/// - `FnsSource` - Federal Tax Service registry search
/// - `KonturSource` - Kontur.Focus API
/// - `HhSource` - hh.ru employer directory
/// - `RateLimitedSource` - wrapper adding a per-source request gate
/// - `MockSource` - for testing
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Identifier candidates from this source carry.
    fn id(&self) -> SourceId;

    /// Look up candidates for a query, finishing before `deadline` if possible.
    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome;

    /// Hand the source its request gate.
    ///
    /// Adapters that send several requests per fetch take the gate and wait on
    /// it before each request, returning true. The default returns false and
    /// the caller gates whole fetches instead.
    fn pace_requests(&mut self, _gate: RequestGate) -> bool {
        false
    }
}

#[async_trait]
impl<S: EntitySource + ?Sized> EntitySource for std::sync::Arc<S> {
    fn id(&self) -> SourceId {
        (**self).id()
    }

    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome {
        (**self).fetch(query, deadline).await
    }
}
