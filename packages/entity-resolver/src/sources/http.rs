//! Shared HTTP plumbing for source adapters.
//!
//! Maps every way a request can go wrong onto a [`SourceOutcome`] so concrete
//! adapters only deal with parsing.

use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::rate_limited::RequestGate;
use crate::error::{ResolverError, Result};
use crate::types::outcome::{HardErrorKind, SoftErrorKind, SourceOutcome};

/// Markers of block pages served with a success status.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "access denied",
    "доступ ограничен",
    "доступ запрещен",
    "подозрительная активность",
];

/// Classify a response status. None means success.
pub fn classify_status(status: StatusCode) -> Option<SourceOutcome> {
    if status.is_success() {
        return None;
    }
    let outcome = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
            SourceOutcome::hard(HardErrorKind::AccessDenied, format!("HTTP {}", status))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            SourceOutcome::hard(HardErrorKind::RateLimited, format!("HTTP {}", status))
        }
        _ => SourceOutcome::soft(SoftErrorKind::Http(status.as_u16()), format!("HTTP {}", status)),
    };
    Some(outcome)
}

/// Classify a transport-level failure.
pub fn classify_transport(err: &reqwest::Error) -> SourceOutcome {
    if err.is_timeout() {
        SourceOutcome::soft(SoftErrorKind::Timeout, err.to_string())
    } else if err.is_decode() {
        SourceOutcome::soft(SoftErrorKind::BadResponse, err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status)
            .unwrap_or_else(|| SourceOutcome::soft(SoftErrorKind::Network, err.to_string()))
    } else {
        SourceOutcome::soft(SoftErrorKind::Network, err.to_string())
    }
}

/// True when a body looks like a captcha or ban page.
pub fn looks_blocked(body: &str) -> bool {
    let lowered = body.to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Classify a body that should have been JSON.
pub fn parse_json_body(body: &str) -> std::result::Result<serde_json::Value, SourceOutcome> {
    serde_json::from_str(body).map_err(|e| {
        if looks_blocked(body) {
            SourceOutcome::hard(HardErrorKind::AccessDenied, "block page instead of JSON")
        } else {
            SourceOutcome::soft(SoftErrorKind::BadResponse, format!("invalid JSON: {}", e))
        }
    })
}

/// HTTP client shared by the concrete adapters.
#[derive(Clone)]
pub struct SourceHttp {
    client: reqwest::Client,
    user_agent: String,
    request_timeout: Duration,
}

impl SourceHttp {
    /// Create a client with the given user agent and a 10 second request timeout.
    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ResolverError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
            request_timeout: Duration::from_secs(10),
        })
    }

    /// Set the per-request timeout cap.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Timeout for a request that must finish by `deadline`; None when the
    /// deadline has already passed.
    pub fn timeout_for(&self, deadline: Instant) -> Option<Duration> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            None
        } else {
            Some(remaining.min(self.request_timeout))
        }
    }

    /// Wait for a permit from `gate`, then send a request and return its JSON
    /// body, or the classified failure.
    pub async fn send_json(
        &self,
        source: &str,
        gate: &RequestGate,
        request: RequestBuilder,
        deadline: Instant,
    ) -> std::result::Result<serde_json::Value, SourceOutcome> {
        if !gate.wait(deadline).await {
            debug!(source = %source, "deadline passed while waiting for request gate");
            return Err(SourceOutcome::Timeout);
        }
        let timeout = self.timeout_for(deadline).ok_or(SourceOutcome::Timeout)?;

        let response = request
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(source = %source, error = %e, "source request failed");
                classify_transport(&e)
            })?;

        let status = response.status();
        if let Some(outcome) = classify_status(status) {
            debug!(source = %source, status = %status, "source returned error status");
            return Err(outcome);
        }

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        parse_json_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Some(SourceOutcome::HardError { kind: HardErrorKind::AccessDenied, .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(SourceOutcome::HardError { kind: HardErrorKind::RateLimited, .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(SourceOutcome::SoftError { kind: SoftErrorKind::Http(502), .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Some(SourceOutcome::SoftError { kind: SoftErrorKind::Http(404), .. })
        ));
    }

    #[test]
    fn test_block_page_instead_of_json_is_hard() {
        let outcome = parse_json_body("<html>Please solve the CAPTCHA</html>").unwrap_err();
        assert!(matches!(
            outcome,
            SourceOutcome::HardError { kind: HardErrorKind::AccessDenied, .. }
        ));

        let outcome = parse_json_body("<html>maintenance</html>").unwrap_err();
        assert!(matches!(
            outcome,
            SourceOutcome::SoftError { kind: SoftErrorKind::BadResponse, .. }
        ));

        assert!(parse_json_body(r#"{"items": []}"#).is_ok());
    }

    #[test]
    fn test_timeout_for_clamps_to_deadline() {
        let http = SourceHttp::new("test/1.0")
            .unwrap()
            .with_timeout(Duration::from_secs(10));

        let near = http
            .timeout_for(Instant::now() + Duration::from_secs(2))
            .unwrap();
        assert!(near <= Duration::from_secs(2));

        let far = http
            .timeout_for(Instant::now() + Duration::from_secs(60))
            .unwrap();
        assert_eq!(far, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_for_past_deadline_is_none() {
        let http = SourceHttp::new("test/1.0").unwrap();
        let past = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(http.timeout_for(past).is_none());
    }
}
