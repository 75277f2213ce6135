//! Typed errors for the resolver library.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Source failures are not
//! errors at this level: adapters report them as [`SourceOutcome`] values and
//! the fan-out absorbs them.
//!
//! [`SourceOutcome`]: crate::types::outcome::SourceOutcome

use thiserror::Error;

/// Errors that can occur inside the resolver's collaborators.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Invalid or incomplete configuration
    #[error("config error: {0}")]
    Config(String),

    /// Cache backend failed
    #[error("cache error: {0}")]
    Cache(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Last-resort disambiguation call failed
    #[error("disambiguation error: {0}")]
    Disambiguation(String),

    /// Rule table could not be loaded
    #[error("rule table error: {reason}")]
    Rules { reason: String },

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// Wrap any backend error as a cache error.
    pub fn cache(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Cache(Box::new(err))
    }
}

/// Result type alias for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
