//! Testing utilities including mock implementations.
//!
//! These let applications exercise the resolver without network calls to
//! real registries or a language model. [`MockHttpServer`] stands in for a
//! registry over a local socket, so the HTTP adapters can be driven end to end.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ResolverError, Result};
use crate::stores::MemoryCache;
use crate::traits::{
    cache::{CacheEntry, ResolutionCache},
    disambiguator::{Disambiguation, Disambiguator},
    source::EntitySource,
};
use crate::types::{
    candidate::{Candidate, RawRecord, SourceId},
    entity::ResolvedEntity,
    outcome::SourceOutcome,
    query::Query,
};

/// A mock source returning scripted outcomes.
///
/// Scripted outcomes are consumed one per call; once they run out every call
/// returns the default, which is a success carrying the configured records.
#[derive(Clone)]
pub struct MockSource {
    id: SourceId,

    /// Records returned on success, with the confidence to report
    records: Arc<RwLock<Vec<(RawRecord, f64)>>>,

    /// Outcomes returned before falling back to the default
    script: Arc<RwLock<VecDeque<SourceOutcome>>>,

    /// Outcome returned once the script is exhausted (None = success)
    fallback: Arc<RwLock<Option<SourceOutcome>>>,

    /// Artificial latency per call
    delay: Duration,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockSourceCall>>>,
}

/// Record of a call made to a mock source.
#[derive(Debug, Clone)]
pub struct MockSourceCall {
    pub query: String,
    pub at: Instant,
}

impl MockSource {
    /// Create a source that succeeds with no candidates.
    pub fn new(id: impl Into<SourceId>) -> Self {
        Self {
            id: id.into(),
            records: Arc::new(RwLock::new(Vec::new())),
            script: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(None)),
            delay: Duration::ZERO,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add a record returned on success.
    pub fn with_record(self, record: RawRecord, confidence: f64) -> Self {
        self.records.write().unwrap().push((record, confidence));
        self
    }

    /// Shorthand for a record with a name and optional INN.
    pub fn with_company(self, name: &str, inn: Option<&str>, confidence: f64) -> Self {
        let mut record = RawRecord::new(name);
        if let Some(inn) = inn {
            record = record.with_inn(inn);
        }
        self.with_record(record, confidence)
    }

    /// Queue an outcome; queued outcomes are returned in order before the default.
    pub fn then(self, outcome: SourceOutcome) -> Self {
        self.script.write().unwrap().push_back(outcome);
        self
    }

    /// Return this outcome on every call once the script is exhausted.
    pub fn always(self, outcome: SourceOutcome) -> Self {
        *self.fallback.write().unwrap() = Some(outcome);
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockSourceCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    fn success(&self) -> SourceOutcome {
        let candidates = self
            .records
            .read()
            .unwrap()
            .iter()
            .map(|(record, confidence)| Candidate::new(self.id.clone(), record.clone(), *confidence))
            .collect();
        SourceOutcome::Success(candidates)
    }
}

#[async_trait]
impl EntitySource for MockSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch(&self, query: &Query, _deadline: Instant) -> SourceOutcome {
        self.calls.write().unwrap().push(MockSourceCall {
            query: query.normalized().to_string(),
            at: Instant::now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.write().unwrap().pop_front();
        let fallback = self.fallback.read().unwrap().clone();
        scripted.or(fallback).unwrap_or_else(|| self.success())
    }
}

/// How a mock disambiguator answers.
#[derive(Debug, Clone)]
enum MockAnswer {
    /// Pick the listed entity with this canonical id
    Choose(String),
    /// Keep the listed entities with these canonical ids
    Narrow(Vec<String>),
    /// Return this verbatim, listed or not
    Verbatim(Disambiguation),
    Fail(String),
}

/// A mock disambiguator with a fixed answer.
#[derive(Clone)]
pub struct MockDisambiguator {
    answer: MockAnswer,
    calls: Arc<RwLock<Vec<Vec<ResolvedEntity>>>>,
}

impl MockDisambiguator {
    fn with_answer(answer: MockAnswer) -> Self {
        Self {
            answer,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Choose the listed entity with this canonical id.
    pub fn choosing(canonical_id: impl Into<String>) -> Self {
        Self::with_answer(MockAnswer::Choose(canonical_id.into()))
    }

    /// Narrow to the listed entities with these canonical ids.
    pub fn narrowing(canonical_ids: &[&str]) -> Self {
        Self::with_answer(MockAnswer::Narrow(
            canonical_ids.iter().map(|id| id.to_string()).collect(),
        ))
    }

    /// Always answer exactly this.
    pub fn returning(answer: Disambiguation) -> Self {
        Self::with_answer(MockAnswer::Verbatim(answer))
    }

    pub fn undecided() -> Self {
        Self::returning(Disambiguation::Undecided)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_answer(MockAnswer::Fail(message.into()))
    }

    /// Ranked lists received, one per call.
    pub fn calls(&self) -> Vec<Vec<ResolvedEntity>> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Disambiguator for MockDisambiguator {
    async fn disambiguate(&self, _query: &Query, ranked: &[ResolvedEntity]) -> Result<Disambiguation> {
        self.calls.write().unwrap().push(ranked.to_vec());

        let find = |id: &str| ranked.iter().find(|e| e.canonical_id == id).cloned();
        match &self.answer {
            MockAnswer::Choose(id) => Ok(find(id)
                .map(Disambiguation::Chosen)
                .unwrap_or(Disambiguation::Undecided)),
            MockAnswer::Narrow(ids) => Ok(Disambiguation::Narrowed(
                ids.iter().filter_map(|id| find(id)).collect(),
            )),
            MockAnswer::Verbatim(answer) => Ok(answer.clone()),
            MockAnswer::Fail(message) => Err(ResolverError::Disambiguation(message.clone())),
        }
    }
}

/// A memory cache that counts reads and writes, and can be told to fail.
#[derive(Clone)]
pub struct CountingCache {
    inner: Arc<MemoryCache>,
    gets: Arc<RwLock<usize>>,
    puts: Arc<RwLock<Vec<(String, Vec<ResolvedEntity>)>>>,
    failing: bool,
}

impl Default for CountingCache {
    fn default() -> Self {
        Self::new(MemoryCache::default())
    }
}

impl CountingCache {
    pub fn new(inner: MemoryCache) -> Self {
        Self {
            inner: Arc::new(inner),
            gets: Arc::new(RwLock::new(0)),
            puts: Arc::new(RwLock::new(Vec::new())),
            failing: false,
        }
    }

    /// Every operation returns a cache error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    /// Seed an entry directly, bypassing the write counter.
    pub fn seed(&self, key: impl Into<String>, entry: CacheEntry) {
        self.inner.put_entry(key, entry);
    }

    pub fn get_count(&self) -> usize {
        *self.gets.read().unwrap()
    }

    /// Writes made through the trait, in order.
    pub fn puts(&self) -> Vec<(String, Vec<ResolvedEntity>)> {
        self.puts.read().unwrap().clone()
    }

    fn unavailable(&self) -> ResolverError {
        ResolverError::cache(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "mock cache unavailable",
        ))
    }
}

#[async_trait]
impl ResolutionCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        *self.gets.write().unwrap() += 1;
        if self.failing {
            return Err(self.unavailable());
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, query: &str, entities: Vec<ResolvedEntity>) -> Result<()> {
        self.puts
            .write()
            .unwrap()
            .push((key.to_string(), entities.clone()));
        if self.failing {
            return Err(self.unavailable());
        }
        self.inner.put(key, query, entities).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.inner.purge_expired().await
    }
}

/// A canned reply served by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct MockRoute {
    method: String,
    path: String,
    status: u16,
    content_type: &'static str,
    body: String,
}

impl MockRoute {
    /// Reply to `method` on exactly `path` (query string ignored) with a JSON body.
    pub fn json(method: &str, path: &str, status: u16, body: serde_json::Value) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    /// Reply with an HTML page, e.g. a captcha.
    pub fn html(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self {
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
            ..Self::json(method, path, status, serde_json::Value::Null)
        }
    }
}

/// A request received by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct MockHttpRequest {
    pub method: String,
    /// Path and query string as sent
    pub target: String,
    pub body: String,
    pub at: Instant,
}

impl MockHttpRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

/// A local HTTP/1.1 server answering from a fixed route table.
///
/// Unmatched requests get a 404. Every connection is closed after one reply.
/// The accept loop stops when the server is dropped.
pub struct MockHttpServer {
    addr: SocketAddr,
    requests: Arc<RwLock<Vec<MockHttpRequest>>>,
    task: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start(routes: Vec<MockRoute>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(RwLock::new(Vec::new()));
        let routes = Arc::new(routes);

        let log = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, &routes, &log).await;
                });
            }
        });

        Ok(Self { addr, requests, task })
    }

    /// Base URL without a trailing slash.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<MockHttpRequest> {
        self.requests.read().unwrap().clone()
    }

    /// Time between consecutive requests.
    pub fn gaps(&self) -> Vec<Duration> {
        self.requests()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    routes: &[MockRoute],
    log: &RwLock<Vec<MockHttpRequest>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let at = Instant::now();

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = MockHttpRequest {
        method,
        target,
        body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
        at,
    };
    let route = routes
        .iter()
        .find(|route| route.method == request.method && route.path == request.path());
    log.write().unwrap().push(request);

    let (status, content_type, body) = match route {
        Some(route) => (route.status, route.content_type, route.body.as_str()),
        None => (404, "application/json", "{}"),
    };
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::outcome::{HardErrorKind, SoftErrorKind};

    #[tokio::test]
    async fn test_mock_source_script_then_success() {
        let source = MockSource::new("fns")
            .with_company("ООО Ромашка", Some("7701234567"), 0.9)
            .then(SourceOutcome::soft(SoftErrorKind::Network, "reset"));
        let query = Query::new("Ромашка");
        let deadline = Instant::now() + Duration::from_secs(1);

        assert!(source.fetch(&query, deadline).await.is_retryable());
        match source.fetch(&query, deadline).await {
            SourceOutcome::Success(candidates) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].source, SourceId::new("fns"));
                assert_eq!(candidates[0].confidence, 0.9);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(source.call_count(), 2);
        assert_eq!(source.calls()[0].query, "ромашка");
    }

    #[tokio::test]
    async fn test_mock_source_always() {
        let source = MockSource::new("kontur")
            .always(SourceOutcome::hard(HardErrorKind::AccessDenied, "403"));
        let query = Query::new("Ромашка");
        for _ in 0..3 {
            let outcome = source.fetch(&query, Instant::now()).await;
            assert!(matches!(outcome, SourceOutcome::HardError { .. }));
        }
    }

    #[tokio::test]
    async fn test_mock_http_server_routes() {
        let server = MockHttpServer::start(vec![MockRoute::json(
            "get",
            "/items",
            200,
            serde_json::json!({ "items": [] }),
        )])
        .await
        .unwrap();
        let client = reqwest::Client::new();

        let found = client
            .get(format!("{}/items?q=1", server.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(found.status(), 200);
        assert_eq!(found.text().await.unwrap(), r#"{"items":[]}"#);

        let missing = client
            .post(format!("{}/items", server.url()))
            .body("q=2")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].target, "/items?q=1");
        assert_eq!(requests[0].path(), "/items");
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].body, "q=2");
    }

    #[tokio::test]
    async fn test_counting_cache_failing() {
        let cache = CountingCache::default().failing();
        assert!(cache.get("k").await.is_err());
        assert!(cache.put("k", "q", vec![]).await.is_err());
        assert_eq!(cache.get_count(), 1);
        assert_eq!(cache.puts().len(), 1);
    }
}
