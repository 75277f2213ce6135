//! Federal Tax Service (EGRUL) registry search.
//!
//! The public search is a two-step exchange: a form POST returns a token `t`,
//! then a GET fetches the rows for that token. When the token step fails the
//! adapter falls back to a direct query GET. Every request waits on the
//! source's gate, so one fetch never bursts past the configured interval.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::http::SourceHttp;
use super::rate_limited::RequestGate;
use crate::normalize::reported_confidence;
use crate::traits::source::EntitySource;
use crate::types::candidate::{Candidate, RawRecord, SourceId};
use crate::types::outcome::SourceOutcome;
use crate::types::query::Query;

pub const FNS_SOURCE_ID: &str = "fns";
pub const DEFAULT_FNS_BASE_URL: &str = "https://egrul.nalog.ru";

/// Registry data is authoritative.
const BASE_CONFIDENCE: f64 = 1.0;

pub struct FnsSource {
    http: SourceHttp,
    base_url: String,
    gate: RequestGate,
}

impl FnsSource {
    pub fn new(http: SourceHttp, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gate: RequestGate::open(),
        }
    }

    /// Pace every request through `gate`.
    pub fn with_gate(mut self, gate: RequestGate) -> Self {
        self.gate = gate;
        self
    }

    /// Ask the search form for a result token.
    async fn token(&self, text: &str, deadline: Instant) -> Result<Option<String>, SourceOutcome> {
        let request = self
            .http
            .client()
            .post(format!("{}/", self.base_url))
            .form(&[("query", text)]);
        let body = self.http.send_json(FNS_SOURCE_ID, &self.gate, request, deadline).await?;
        Ok(body.get("t").and_then(Value::as_str).map(str::to_string))
    }

    fn result_urls(&self, text: &str, token: Option<&str>) -> Vec<(String, Vec<(&'static str, String)>)> {
        let mut urls = Vec::new();
        if let Some(token) = token {
            urls.push((format!("{}/search-result/{}", self.base_url, token), Vec::new()));
        }
        urls.push((
            format!("{}/search", self.base_url),
            vec![("query", text.to_string())],
        ));
        urls
    }
}

/// First non-empty field among the accepted aliases.
fn field(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match row.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Map one EGRUL row onto a record. Rows without any name are skipped.
pub fn parse_row(row: &Value) -> Option<RawRecord> {
    let full = field(row, &["n", "name", "НаимПолн"]);
    let short = field(row, &["c", "short", "НаимСокр"]);
    let name = full.clone().or_else(|| short.clone())?;

    let mut record = RawRecord::new(name);
    if let (Some(_), Some(short)) = (&full, short) {
        record = record.with_short_name(short);
    }
    if let Some(inn) = field(row, &["i", "inn", "ИНН"]) {
        record = record.with_inn(inn);
    }
    if let Some(ogrn) = field(row, &["o", "ogrn", "ОГРН"]) {
        record = record.with_ogrn(ogrn);
    }
    if let Some(status) = field(row, &["s", "status", "Статус"]) {
        record = record.with_status(status);
    }
    if let Some(reg_date) = field(row, &["r", "reg_date", "ДатаРег"]) {
        record = record.with_extra(serde_json::json!({ "reg_date": reg_date }));
    }
    Some(record)
}

/// Records in a search response body (`rows` or `items`).
pub fn parse_rows(body: &Value) -> Vec<RawRecord> {
    body.get("rows")
        .or_else(|| body.get("items"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(parse_row).collect())
        .unwrap_or_default()
}

#[async_trait]
impl EntitySource for FnsSource {
    fn id(&self) -> SourceId {
        SourceId::new(FNS_SOURCE_ID)
    }

    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome {
        let text = query.search_text();

        let token = match self.token(text, deadline).await {
            Ok(token) => token,
            // A blocked form means the result endpoints are blocked too
            Err(outcome @ SourceOutcome::HardError { .. }) => return outcome,
            Err(outcome) => {
                debug!(outcome = %outcome.label(), "fns token request failed, using direct search");
                None
            }
        };

        let mut last_failure = None;
        let mut records = Vec::new();
        for (url, params) in self.result_urls(text, token.as_deref()) {
            let request = self.http.client().get(&url).query(&params);
            match self.http.send_json(FNS_SOURCE_ID, &self.gate, request, deadline).await {
                Ok(body) => {
                    records = parse_rows(&body);
                    last_failure = None;
                    if !records.is_empty() {
                        break;
                    }
                }
                Err(outcome @ SourceOutcome::HardError { .. }) => return outcome,
                Err(outcome) => last_failure = Some(outcome),
            }
        }

        if let Some(outcome) = last_failure {
            return outcome;
        }

        let candidates = records
            .into_iter()
            .map(|record| {
                let confidence = reported_confidence(BASE_CONFIDENCE, query, &record);
                Candidate::new(FNS_SOURCE_ID, record, confidence)
            })
            .collect();
        SourceOutcome::Success(candidates)
    }

    fn pace_requests(&mut self, gate: RequestGate) -> bool {
        self.gate = gate;
        true
    }
}
