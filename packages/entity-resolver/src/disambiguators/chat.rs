//! Chat-model disambiguator over an OpenAI-compatible API.
//!
//! Defaults to DeepSeek. The model sees the query and the top few options and
//! answers with a small JSON object:
//!
//! ```json
//! {"action":"select|clarify","inn":"string or null","option":1,"clarify":"question or null"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ResolverError, Result};
use crate::traits::disambiguator::{Disambiguation, Disambiguator};
use crate::types::{entity::ResolvedEntity, query::Query};

pub const DEFAULT_API_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Options shown to the model; also the most a clarify answer can narrow to.
const MAX_OPTIONS: usize = 5;

const SYSTEM_PROMPT: &str = "You are an expert on Russian companies. Reply with JSON only.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// The model's decision.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub action: String,
    #[serde(default)]
    pub inn: Option<String>,
    /// 1-based option number, for options without an identifier
    #[serde(default)]
    pub option: Option<usize>,
    #[serde(default)]
    pub clarify: Option<String>,
}

/// Disambiguator backed by a chat completion endpoint.
pub struct ChatDisambiguator {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl ChatDisambiguator {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| ResolverError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Build from `DEEPSEEK_API_KEY`, `DEEPSEEK_API_BASE` and `DEEPSEEK_MODEL`.
    ///
    /// Returns None when no key is set.
    pub fn from_env() -> Result<Option<Self>> {
        let api_key = match env::var("DEEPSEEK_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };

        let mut disambiguator = Self::new(api_key)?;
        if let Ok(base) = env::var("DEEPSEEK_API_BASE") {
            disambiguator = disambiguator.with_api_base(base);
        }
        if let Ok(model) = env::var("DEEPSEEK_MODEL") {
            disambiguator = disambiguator.with_model(model);
        }
        Ok(Some(disambiguator))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "disambiguation request failed");
                ResolverError::Disambiguation(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "disambiguation API error");
            return Err(ResolverError::Disambiguation(format!("API error {}", status)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::Disambiguation(format!("unreadable response: {}", e)))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ResolverError::Disambiguation("empty response".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "disambiguation completion"
        );
        Ok(content)
    }
}

/// Prompt listing the query and up to five options.
pub fn build_prompt(query: &Query, options: &[ResolvedEntity]) -> String {
    let mut lines = vec![
        format!("Query: \"{}\"", query.raw().trim()),
        String::new(),
        "Registry options:".to_string(),
    ];
    for (i, entity) in options.iter().take(MAX_OPTIONS).enumerate() {
        let id = entity
            .identifier
            .as_ref()
            .map(|id| format!("{} {}", id.kind.as_str().to_uppercase(), id.value))
            .unwrap_or_else(|| "no registry number".to_string());
        let status = entity.status.as_deref().unwrap_or("-");
        lines.push(format!(
            "{}. \"{}\" ({}, status {}, sources: {})",
            i + 1,
            entity.canonical_name,
            id,
            status,
            entity.source_count()
        ));
    }
    lines.extend([
        String::new(),
        "Rules:".to_string(),
        "- If one option is clearly correct, return its INN (or its option number if it has none)".to_string(),
        "- If options are ambiguous, ask one clarification question".to_string(),
        "- Reply strictly in JSON, no extra text".to_string(),
        String::new(),
        "Format:".to_string(),
        r#"{"action":"select|clarify","inn":"string or null","option":"number or null","clarify":"question or null"}"#.to_string(),
    ]);
    lines.join("\n")
}

/// Extract the JSON object from a reply, tolerating prose or code fences around it.
pub fn parse_reply(text: &str) -> Option<ChatReply> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Turn a reply into a decision over the options shown.
pub fn decide(reply: &ChatReply, shown: &[ResolvedEntity]) -> Disambiguation {
    match reply.action.trim().to_lowercase().as_str() {
        "select" => {
            let by_identifier = reply.inn.as_deref().map(str::trim).and_then(|wanted| {
                shown.iter().find(|e| {
                    e.identifier.as_ref().map(|id| id.value.as_str()) == Some(wanted)
                })
            });
            let by_option = || {
                reply
                    .option
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| shown.get(i))
            };
            by_identifier
                .or_else(by_option)
                .cloned()
                .map(Disambiguation::Chosen)
                .unwrap_or(Disambiguation::Undecided)
        }
        "clarify" => {
            if let Some(question) = &reply.clarify {
                debug!(question = %question, "model asked for clarification");
            }
            Disambiguation::Narrowed(shown.to_vec())
        }
        _ => Disambiguation::Undecided,
    }
}

#[async_trait]
impl Disambiguator for ChatDisambiguator {
    async fn disambiguate(&self, query: &Query, ranked: &[ResolvedEntity]) -> Result<Disambiguation> {
        let shown = &ranked[..ranked.len().min(MAX_OPTIONS)];
        let prompt = build_prompt(query, shown);
        let content = self.complete(&prompt).await?;

        match parse_reply(&content) {
            Some(reply) => Ok(decide(&reply, shown)),
            None => {
                warn!(reply = %content, "disambiguation reply is not JSON");
                Ok(Disambiguation::Undecided)
            }
        }
    }
}
