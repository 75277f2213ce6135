//! Source adapters.
//!
//! Provides:
//! - `FnsSource` - Federal Tax Service registry search
//! - `KonturSource` - Kontur.Focus API (needs an API key)
//! - `HhSource` - hh.ru employer directory
//! - `RateLimitedSource` - Wrapper enforcing a minimum request interval
//! - `SourceHttp` - Shared HTTP client and failure classification

pub mod fns;
pub mod hh;
pub mod http;
pub mod kontur;
pub mod rate_limited;

pub use fns::FnsSource;
pub use hh::HhSource;
pub use http::SourceHttp;
pub use kontur::KonturSource;
pub use rate_limited::{RateLimitedSource, RequestGate, SourceExt};
