//! hh.ru employer directory. Returns names only, never identifiers.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::http::SourceHttp;
use super::rate_limited::RequestGate;
use crate::normalize::reported_confidence;
use crate::traits::source::EntitySource;
use crate::types::candidate::{Candidate, RawRecord, SourceId};
use crate::types::outcome::{SoftErrorKind, SourceOutcome};
use crate::types::query::Query;

pub const HH_SOURCE_ID: &str = "hh";
pub const DEFAULT_HH_URL: &str = "https://api.hh.ru/employers";

const BASE_CONFIDENCE: f64 = 0.7;
const PER_PAGE: &str = "5";

pub struct HhSource {
    http: SourceHttp,
    gate: RequestGate,
    url: String,
}

impl HhSource {
    pub fn new(http: SourceHttp) -> Self {
        Self {
            http,
            gate: RequestGate::open(),
            url: DEFAULT_HH_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Pace every request through `gate`.
    pub fn with_gate(mut self, gate: RequestGate) -> Self {
        self.gate = gate;
        self
    }
}

/// Employer names in a response body.
pub fn parse_employers(body: &Value) -> Result<Vec<RawRecord>, SourceOutcome> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceOutcome::soft(SoftErrorKind::BadResponse, "hh body has no items"))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let mut record = RawRecord::new(name);
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                record = record.with_extra(serde_json::json!({ "hh_id": id }));
            }
            Some(record)
        })
        .collect())
}

#[async_trait]
impl EntitySource for HhSource {
    fn id(&self) -> SourceId {
        SourceId::new(HH_SOURCE_ID)
    }

    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome {
        // Employer search is by name; a bare identifier finds nothing here
        let text = if query.normalized().is_empty() {
            query.search_text()
        } else {
            query.raw().trim()
        };
        let request = self
            .http
            .client()
            .get(&self.url)
            .query(&[("text", text), ("per_page", PER_PAGE)]);

        let body = match self.http.send_json(HH_SOURCE_ID, &self.gate, request, deadline).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        match parse_employers(&body) {
            Ok(records) => SourceOutcome::Success(
                records
                    .into_iter()
                    .map(|record| {
                        let confidence = reported_confidence(BASE_CONFIDENCE, query, &record);
                        Candidate::new(HH_SOURCE_ID, record, confidence)
                    })
                    .collect(),
            ),
            Err(outcome) => outcome,
        }
    }

    fn pace_requests(&mut self, gate: RequestGate) -> bool {
        self.gate = gate;
        true
    }
}
