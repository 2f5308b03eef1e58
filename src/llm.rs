//! Blocking client for an OpenAI-compatible chat completions endpoint.
//!
//! The API key is an explicit value: it is read once by the CLI and handed to
//! [`LlmClient::new`]. Nothing in this module reads the environment on its own
//! except [`ApiKey::from_env`].

use crate::{chunk::Chunk, config::LlmConfig};
use reqwest::{
    StatusCode,
    blocking::Client,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONNECTION_TEST_PROMPT: &str = "Hello, are you working?";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set (expected it in ${0})")]
    MissingCredential(String),
    #[error("API key has an unexpected format (keys start with \"sk-\")")]
    InvalidCredential,
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("insufficient quota: {0}")]
    QuotaExceeded(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("model {model:?} not found: {message}")]
    ModelNotFound { model: String, message: String },
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) | Self::InvalidCredential => "credential_error",
            Self::Authentication(_) => "authentication_error",
            Self::RateLimited(_) => "rate_limit_error",
            Self::QuotaExceeded(_) => "quota_error",
            Self::Network(_) => "network_error",
            Self::ModelNotFound { .. } => "invalid_model_error",
            Self::Api { .. } | Self::InvalidResponse(_) => "api_error",
        }
    }
}

/// API credential. `Debug` never prints the value.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>, source: &str) -> Result<Self, LlmError> {
        let value = value.into();
        let value = value.trim();
        if value.is_empty() {
            return Err(LlmError::MissingCredential(source.to_string()));
        }
        if !value.starts_with("sk-") {
            return Err(LlmError::InvalidCredential);
        }
        Ok(Self(value.to_string()))
    }

    /// Resolve the key through `lookup`, keyed by variable name.
    pub fn from_lookup<F>(var: &str, lookup: F) -> Result<Self, LlmError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        Self::new(lookup(var).unwrap_or_default(), var)
    }

    pub fn from_env(var: &str) -> Result<Self, LlmError> {
        Self::from_lookup(var, |k| std::env::var(k).ok())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_message: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_message: None,
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    http: Client,
    key: ApiKey,
    cfg: LlmConfig,
}

impl LlmClient {
    pub fn new(cfg: &LlmConfig, key: ApiKey) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent(concat!("docsift/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self {
            http,
            key,
            cfg: cfg.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    pub fn complete(&self, req: &CompletionRequest) -> Result<Completion, LlmError> {
        let model = req.model.as_deref().unwrap_or(&self.cfg.model);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = req.system_message.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": req.prompt}));

        let payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.cfg.max_tokens),
            "temperature": req.temperature.unwrap_or(self.cfg.temperature),
        });

        debug!(model, prompt_chars = req.prompt.len(), "sending completion request");

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.key.expose()))
            .map_err(|_| LlmError::InvalidCredential)?;
        auth.set_sensitive(true);

        let response = self
            .http
            .post(self.endpoint())
            .header(AUTHORIZATION, auth)
            .json(&payload)
            .send()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let err = classify(status, &body, model);
            warn!(status = status.as_u16(), kind = err.kind(), "completion request failed");
            return Err(err);
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;

        let completion = Completion {
            text: choice.message.content.unwrap_or_default(),
            model: if body.model.is_empty() {
                model.to_string()
            } else {
                body.model
            },
            usage: body.usage.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        };
        info!(
            model = %completion.model,
            total_tokens = completion.usage.total_tokens,
            "completion received"
        );
        Ok(completion)
    }

    /// Round-trip a short fixed prompt to confirm the key and endpoint work.
    pub fn test_connection(&self) -> Result<Completion, LlmError> {
        let mut req = CompletionRequest::new(CONNECTION_TEST_PROMPT);
        req.max_tokens = Some(50);
        self.complete(&req)
    }
}

/// Map an unsuccessful response to an error kind, looking at the status
/// first and the provider's error text second.
pub fn classify(status: StatusCode, body: &str, model: &str) -> LlmError {
    let message = error_message(body);
    let lower = message.to_lowercase();

    if status == StatusCode::UNAUTHORIZED
        || lower.contains("invalid_api_key")
        || lower.contains("incorrect api key")
    {
        return LlmError::Authentication(message);
    }
    if lower.contains("insufficient_quota") || lower.contains("quota") {
        return LlmError::QuotaExceeded(message);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || lower.contains("rate_limit") {
        return LlmError::RateLimited(message);
    }
    if status == StatusCode::NOT_FOUND
        || (lower.contains("model") && lower.contains("does not exist"))
    {
        return LlmError::ModelNotFound {
            model: model.to_string(),
            message,
        };
    }
    if status == StatusCode::GATEWAY_TIMEOUT || status == StatusCode::REQUEST_TIMEOUT {
        return LlmError::Network(message);
    }
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

/// OpenAI-style bodies carry `{"error": {"message", "code", "type"}}`; keep
/// the code next to the message so classification can see both.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let err = parsed.as_ref().and_then(|v| v.get("error"));
    match err {
        Some(e) => {
            let msg = e.get("message").and_then(|m| m.as_str()).unwrap_or_default();
            let code = e
                .get("code")
                .and_then(|c| c.as_str())
                .or_else(|| e.get("type").and_then(|t| t.as_str()));
            match code {
                Some(code) => format!("{msg} [{code}]"),
                None => msg.to_string(),
            }
        }
        None => body.trim().to_string(),
    }
}

/// Take chunks in order until the token budget is spent. At least one chunk
/// is returned when any exist.
pub fn select_passages(chunks: &[Chunk], max_tokens: usize) -> Vec<&str> {
    let mut used = 0usize;
    let mut out = Vec::new();
    for c in chunks {
        if !out.is_empty() && used + c.token_count > max_tokens {
            break;
        }
        used += c.token_count;
        out.push(c.text.as_str());
    }
    out
}

/// Prompt that grounds a question in numbered document excerpts.
pub fn build_prompt(question: &str, passages: &[&str]) -> String {
    let mut prompt = String::from("Document excerpts:\n\n");
    for (i, p) in passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, p.trim()));
    }
    prompt.push_str("Question: ");
    prompt.push_str(question.trim());
    prompt.push_str("\nAnswer:");
    prompt
}
