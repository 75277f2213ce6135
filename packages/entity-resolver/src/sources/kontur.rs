//! Kontur.Focus API search.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

use super::http::SourceHttp;
use super::rate_limited::RequestGate;
use crate::normalize::reported_confidence;
use crate::traits::source::EntitySource;
use crate::types::candidate::{Candidate, RawRecord, SourceId};
use crate::types::outcome::{SoftErrorKind, SourceOutcome};
use crate::types::query::Query;

pub const KONTUR_SOURCE_ID: &str = "kontur";
pub const DEFAULT_KONTUR_URL: &str = "https://focus-api.kontur.ru/api3/search";

const BASE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    req: Option<Requisites>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Requisites {
    ogrn: Option<String>,
    inn: Option<String>,
    full_name: Option<String>,
    short_name: Option<String>,
    status: Option<String>,
}

/// Map a search response body onto records.
pub fn parse_items(body: serde_json::Value) -> Result<Vec<RawRecord>, SourceOutcome> {
    let response: SearchResponse = serde_json::from_value(body).map_err(|e| {
        SourceOutcome::soft(SoftErrorKind::BadResponse, format!("unexpected kontur body: {}", e))
    })?;

    Ok(response
        .items
        .into_iter()
        .filter_map(|item| item.req)
        .filter_map(|req| {
            let name = req.full_name.clone().or_else(|| req.short_name.clone())?;
            let mut record = RawRecord::new(name);
            if req.full_name.is_some() {
                if let Some(short) = req.short_name {
                    record = record.with_short_name(short);
                }
            }
            if let Some(inn) = req.inn {
                record = record.with_inn(inn);
            }
            if let Some(ogrn) = req.ogrn {
                record = record.with_ogrn(ogrn);
            }
            if let Some(status) = req.status {
                record = record.with_status(status);
            }
            Some(record)
        })
        .collect())
}

/// Kontur.Focus adapter. Needs an API key.
pub struct KonturSource {
    http: SourceHttp,
    gate: RequestGate,
    api_key: String,
    url: String,
}

impl KonturSource {
    /// None when no key is configured; the source is then left out entirely.
    pub fn new(http: SourceHttp, api_key: Option<String>) -> Option<Self> {
        let api_key = api_key.filter(|key| !key.trim().is_empty())?;
        Some(Self {
            http,
            gate: RequestGate::open(),
            api_key,
            url: DEFAULT_KONTUR_URL.to_string(),
        })
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

#[async_trait]
impl EntitySource for KonturSource {
    fn id(&self) -> SourceId {
        SourceId::new(KONTUR_SOURCE_ID)
    }

    async fn fetch(&self, query: &Query, deadline: Instant) -> SourceOutcome {
        let request = self
            .http
            .client()
            .get(&self.url)
            .query(&[("query", query.search_text()), ("key", self.api_key.as_str())]);

        let body = match self.http.send_json(KONTUR_SOURCE_ID, &self.gate, request, deadline).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        match parse_items(body) {
            Ok(records) => SourceOutcome::Success(
                records
                    .into_iter()
                    .map(|record| {
                        let confidence = reported_confidence(BASE_CONFIDENCE, query, &record);
                        Candidate::new(KONTUR_SOURCE_ID, record, confidence)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockHttpServer, MockRoute};
    use crate::types::outcome::HardErrorKind;
    use serde_json::json;
    use std::time::Duration;

    async fn fetch_from(server: &MockHttpServer) -> SourceOutcome {
        let source = KonturSource::new(SourceHttp::new("test/1.0").unwrap(), Some("secret".into()))
            .unwrap()
            .with_url(format!("{}/api3/search", server.url()));
        source
            .fetch(&Query::new("7701234567"), Instant::now() + Duration::from_secs(5))
            .await
    }

    #[test]
    fn test_parse_requisites() {
        let body = json!({
            "items": [
                { "req": {
                    "ogrn": "1027700132195",
                    "inn": "7701234567",
                    "fullName": "ООО \"Ромашка\"",
                    "shortName": "Ромашка",
                    "status": "active"
                }},
                { "req": null },
                { "req": { "inn": "7709876543" } }
            ]
        });

        let records = parse_items(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name(), "ООО \"Ромашка\"");
        assert_eq!(records[0].name_short.as_deref(), Some("Ромашка"));
        assert_eq!(records[0].ogrn.as_deref(), Some("1027700132195"));
    }

    #[test]
    fn test_missing_items_is_empty_success() {
        assert!(parse_items(json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_shape_is_bad_response() {
        let outcome = parse_items(json!({ "items": "nope" })).unwrap_err();
        assert!(matches!(
            outcome,
            SourceOutcome::SoftError { kind: SoftErrorKind::BadResponse, .. }
        ));
    }

    #[test]
    fn test_requires_api_key() {
        let http = SourceHttp::new("test/1.0").unwrap();
        assert!(KonturSource::new(http.clone(), None).is_none());
        assert!(KonturSource::new(http.clone(), Some("  ".into())).is_none());
        assert!(KonturSource::new(http, Some("secret".into())).is_some());
    }

    #[test]
    fn test_candidate_confidence_uses_identifier_coefficient() {
        let query = Query::new("Ромашка");
        let records = parse_items(json!({
            "items": [{ "req": { "fullName": "Ромашка", "inn": "7701234567" } }]
        }))
        .unwrap();
        let confidence = reported_confidence(BASE_CONFIDENCE, &query, &records[0]);
        assert!((confidence - 0.63).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fetch_sends_key_and_parses_items() {
        let server = MockHttpServer::start(vec![MockRoute::json(
            "GET",
            "/api3/search",
            200,
            json!({ "items": [{ "req": { "inn": "7701234567", "fullName": "ООО Ромашка" } }] }),
        )])
        .await
        .unwrap();

        match fetch_from(&server).await {
            SourceOutcome::Success(candidates) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].source, SourceId::new(KONTUR_SOURCE_ID));
            }
            other => panic!("expected success, got {:?}", other),
        }

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].target.contains("key=secret"));
        assert!(requests[0].target.contains("query=7701234567"));
    }

    #[tokio::test]
    async fn test_too_many_requests_is_hard() {
        let server = MockHttpServer::start(vec![MockRoute::json("GET", "/api3/search", 429, json!({}))])
            .await
            .unwrap();

        let outcome = fetch_from(&server).await;
        assert!(
            matches!(outcome, SourceOutcome::HardError { kind: HardErrorKind::RateLimited, .. }),
            "got {:?}",
            outcome
        );
    }
}
