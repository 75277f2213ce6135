//! Outcome types - per-source outcomes and the engine's resolution result.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::candidate::{Candidate, SourceId};
use super::entity::ResolvedEntity;

/// Retry-eligible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftErrorKind {
    /// The request itself timed out
    Timeout,
    /// Connection or transport failure
    Network,
    /// Body was malformed or not what the source normally returns
    BadResponse,
    /// Any other non-success HTTP status
    Http(u16),
}

/// Failure kinds that must not be retried within one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardErrorKind {
    /// Access denied, blocked, or a captcha wall
    AccessDenied,
    /// The source asked us to slow down
    RateLimited,
}

impl fmt::Display for SoftErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::BadResponse => write!(f, "bad_response"),
            Self::Http(status) => write!(f, "http_{}", status),
        }
    }
}

impl fmt::Display for HardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "access_denied"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Result of one adapter invocation.
///
/// Every failure path of an adapter ends in one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Success(Vec<Candidate>),
    SoftError { kind: SoftErrorKind, detail: String },
    HardError { kind: HardErrorKind, detail: String },
    Timeout,
}

impl SourceOutcome {
    pub fn soft(kind: SoftErrorKind, detail: impl Into<String>) -> Self {
        Self::SoftError {
            kind,
            detail: detail.into(),
        }
    }

    pub fn hard(kind: HardErrorKind, detail: impl Into<String>) -> Self {
        Self::HardError {
            kind,
            detail: detail.into(),
        }
    }

    /// Only soft errors may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SoftError { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Success(c) => format!("success({})", c.len()),
            Self::SoftError { kind, .. } => format!("soft_error({})", kind),
            Self::HardError { kind, .. } => format!("hard_error({})", kind),
            Self::Timeout => "timeout".to_string(),
        }
    }
}

/// Final outcome of one source within a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: SourceId,
    pub outcome: SourceOutcome,
    /// Number of fetch attempts made (0 when the deadline hit before the first)
    pub attempts: u32,
}

impl SourceReport {
    /// Candidates carried by a successful outcome.
    pub fn into_candidates(self) -> Vec<Candidate> {
        match self.outcome {
            SourceOutcome::Success(candidates) => candidates,
            _ => Vec::new(),
        }
    }
}

/// Why a resolution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Consensus could not narrow the result and no disambiguator is configured
    DisambiguationUnavailable,
    /// The disambiguator errored or could not decide
    DisambiguationFailed(String),
    /// A collaborator returned data that contradicts the candidate set
    Inconsistent(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisambiguationUnavailable => write!(f, "disambiguation unavailable"),
            Self::DisambiguationFailed(detail) => write!(f, "disambiguation failed: {}", detail),
            Self::Inconsistent(detail) => write!(f, "inconsistent result: {}", detail),
        }
    }
}

/// Minimum number of entities in an ambiguous result.
pub const MIN_AMBIGUOUS: usize = 2;

/// Hard ceiling on an ambiguous result; `max_ambiguous` may only lower it.
pub const MAX_AMBIGUOUS: usize = 5;

/// Outcome of a whole resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum ResolutionResult {
    Resolved(ResolvedEntity),
    /// Ordered by descending confidence; always 2..=max_ambiguous entries
    Ambiguous(Vec<ResolvedEntity>),
    NotFound,
    Failed(FailureReason),
}

impl ResolutionResult {
    /// Collapse a ranked list into a result under the ambiguity bound.
    ///
    /// Zero entities is NotFound, one is Resolved, `2..=max_ambiguous` is
    /// Ambiguous. Longer lists return None: they need further narrowing.
    pub fn collapse(mut entities: Vec<ResolvedEntity>, max_ambiguous: usize) -> Option<Self> {
        match entities.len() {
            0 => Some(Self::NotFound),
            1 => entities.pop().map(Self::Resolved),
            n if n >= MIN_AMBIGUOUS && n <= max_ambiguous.min(MAX_AMBIGUOUS) => {
                Some(Self::Ambiguous(entities))
            }
            _ => None,
        }
    }

    /// Entities worth caching; None for NotFound/Failed.
    pub fn cacheable_entities(&self) -> Option<Vec<ResolvedEntity>> {
        match self {
            Self::Resolved(entity) => Some(vec![entity.clone()]),
            Self::Ambiguous(entities) => Some(entities.clone()),
            Self::NotFound | Self::Failed(_) => None,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Ambiguous(_) => "ambiguous",
            Self::NotFound => "not_found",
            Self::Failed(_) => "failed",
        }
    }
}
