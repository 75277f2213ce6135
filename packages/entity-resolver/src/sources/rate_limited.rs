//! Rate-limited source wrapper.
//!
//! Wraps any [`EntitySource`] with a per-source request gate built on the
//! governor crate. The gate admits one request per `min_interval` with no
//! burst, so the interval holds across every concurrent caller sharing it.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::source::EntitySource;
use crate::types::{candidate::SourceId, outcome::SourceOutcome, query::Query};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Serialization gate enforcing a minimum interval between requests.
///
/// Cloning shares the underlying limiter: every clone draws from the same
/// budget. A zero interval makes an open gate.
#[derive(Clone)]
pub struct RequestGate {
    limiter: Option<Arc<DirectRateLimiter>>,
    min_interval: Duration,
}

impl RequestGate {
    /// Create a gate admitting one request per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(nonzero!(1u32)))));
        Self {
            limiter,
            min_interval,
        }
    }

    /// A gate that never waits.
    pub fn open() -> Self {
        Self {
            limiter: None,
            min_interval: Duration::ZERO,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for a permit, giving up at `deadline`.
    ///
    /// Returns false when the deadline passed first; no permit is consumed then.
    pub async fn wait(&self, deadline: Instant) -> bool {
        match &self.limiter {
            None => true,
            Some(limiter) => tokio::time::timeout_at(deadline, limiter.until_ready())
                .await
                .is_ok(),
        }
    }
}

/// A source wrapper that enforces a minimum interval between requests.
pub struct RateLimitedSource<S: EntitySource> {
    inner: S,
    gate: RequestGate,
}

impl<S: EntitySource> RateLimitedSource<S> {
    /// Create a rate-limited source with its own gate.
    ///
    /// # Arguments
    /// * `source` - The underlying source to wrap
    /// * `min_interval` - Minimum delay between two requests
    pub fn new(source: S, min_interval: Duration) -> Self {
        Self {
            inner: source,
            gate: RequestGate::new(min_interval),
        }
    }

    /// Create with an existing (possibly shared) gate.
    pub fn with_gate(source: S, gate: RequestGate) -> Self {
        Self {
            inner: source,
            gate,
        }
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EntitySource> EntitySource for RateLimitedSource<S> {
    fn id(&self) -> SourceId {
        self.inner.id()
    }

    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome {
        if !self.gate.wait(deadline).await {
            debug!(source = %self.inner.id(), "deadline passed while waiting for request gate");
            return SourceOutcome::Timeout;
        }
        self.inner.fetch(query, deadline).await
    }
}

/// Extension trait for easy rate limiting.
pub trait SourceExt: EntitySource + Sized {
    /// Wrap this source with a minimum request interval.
    fn rate_limited(self, min_interval: Duration) -> RateLimitedSource<Self> {
        RateLimitedSource::new(self, min_interval)
    }
}

impl<S: EntitySource + Sized> SourceExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSource;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_interval_holds_under_concurrent_calls() {
        let source = MockSource::new("fns").rate_limited(Duration::from_millis(150));
        let query = Query::new("Ромашка");
        let deadline = Instant::now() + Duration::from_secs(5);

        let start = std::time::Instant::now();
        let outcomes = join_all((0..3).map(|_| source.fetch(&query, deadline))).await;
        let elapsed = start.elapsed();

        assert!(outcomes.iter().all(|o| o.is_success()));
        // First request is immediate, the 2nd and 3rd each wait one interval
        assert!(
            elapsed >= Duration::from_millis(290),
            "Rate limiting not working: {:?}",
            elapsed
        );
        assert_eq!(source.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn test_deadline_while_waiting_is_timeout() {
        let source = MockSource::new("fns").rate_limited(Duration::from_secs(30));
        let query = Query::new("Ромашка");

        let first = source
            .fetch(&query, Instant::now() + Duration::from_secs(1))
            .await;
        assert!(first.is_success());

        let second = source
            .fetch(&query, Instant::now() + Duration::from_millis(50))
            .await;
        assert_eq!(second, SourceOutcome::Timeout);
        // The blocked call never reached the source
        assert_eq!(source.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_gate_spans_wrappers() {
        let gate = RequestGate::new(Duration::from_secs(30));
        let a = RateLimitedSource::with_gate(MockSource::new("fns"), gate.clone());
        let b = RateLimitedSource::with_gate(MockSource::new("fns"), gate);
        let query = Query::new("Ромашка");

        assert!(a.fetch(&query, Instant::now() + Duration::from_secs(1)).await.is_success());
        let blocked = b.fetch(&query, Instant::now() + Duration::from_millis(50)).await;
        assert_eq!(blocked, SourceOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_zero_interval_is_open() {
        let gate = RequestGate::new(Duration::ZERO);
        assert_eq!(gate.min_interval(), Duration::ZERO);
        for _ in 0..5 {
            assert!(gate.wait(Instant::now()).await);
        }
    }
}
