//! Concurrent dispatch of one query to every configured source.

use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info_span, warn, Instrument};

use crate::traits::source::EntitySource;
use crate::types::config::{FanOutConfig, MAX_FANOUT_DEADLINE};
use crate::types::outcome::{SourceOutcome, SourceReport};
use crate::types::query::Query;

/// Runs every source concurrently under a shared deadline.
///
/// Soft errors are retried with exponential backoff, hard errors never are,
/// and sources still pending at the deadline are abandoned and reported as
/// timed out. One failing source never aborts the others.
pub struct FanOut {
    sources: Vec<Arc<dyn EntitySource>>,
    config: FanOutConfig,
}

impl FanOut {
    pub fn new(config: FanOutConfig) -> Self {
        Self {
            sources: Vec::new(),
            config,
        }
    }

    /// Add a source.
    pub fn with_source(mut self, source: impl EntitySource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Add an already shared source.
    pub fn add_source(&mut self, source: Arc<dyn EntitySource>) {
        self.sources.push(source);
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Query every source; one report per source, in configuration order.
    pub async fn dispatch(&self, query: &Query) -> Vec<SourceReport> {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.config.deadline().min(MAX_FANOUT_DEADLINE))
            .unwrap_or(now);
        let span = info_span!("fanout", query = %query.normalized(), sources = self.sources.len());

        async {
            let reports = join_all(
                self.sources
                    .iter()
                    .map(|source| self.run_source(source.as_ref(), query, deadline)),
            )
            .await;

            let succeeded = reports.iter().filter(|r| r.outcome.is_success()).count();
            debug!(succeeded, total = reports.len(), "fan-out complete");
            reports
        }
        .instrument(span)
        .await
    }

    async fn run_source(&self, source: &dyn EntitySource, query: &Query, deadline: Instant) -> SourceReport {
        let id = source.id();
        let mut attempts = 0u32;

        let outcome = loop {
            if Instant::now() >= deadline {
                break SourceOutcome::Timeout;
            }

            attempts += 1;
            let outcome = timeout_at(deadline, source.fetch(query, deadline))
                .await
                .unwrap_or(SourceOutcome::Timeout);

            if !outcome.is_retryable() || attempts > self.config.max_retries {
                break outcome;
            }

            let backoff = self
                .config
                .backoff_base()
                .checked_mul(2u32.saturating_pow(attempts - 1));
            let resume = backoff.and_then(|b| Instant::now().checked_add(b));
            let (Some(backoff), Some(resume)) = (backoff, resume) else {
                debug!(source = %id, attempt = attempts, "backoff out of range");
                break outcome;
            };
            if resume >= deadline {
                debug!(source = %id, attempt = attempts, "no time left for another retry");
                break outcome;
            }

            debug!(
                source = %id,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                outcome = %outcome.label(),
                "retrying source"
            );
            tokio::time::sleep(backoff).await;
        };

        let outcome = match outcome {
            SourceOutcome::Success(candidates) => {
                let total = candidates.len();
                let kept: Vec<_> = candidates.into_iter().filter(|c| c.source == id).collect();
                if kept.len() < total {
                    warn!(
                        source = %id,
                        dropped = total - kept.len(),
                        "dropping candidates attributed to another source"
                    );
                }
                SourceOutcome::Success(kept)
            }
            other => {
                warn!(source = %id, attempts, outcome = %other.label(), "source degraded");
                other
            }
        };

        SourceReport {
            source: id,
            outcome,
            attempts,
        }
    }
}
