//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{QabotError, Result};
use crate::message::Message;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
}

impl ModelCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }

    pub fn into_text(self) -> String {
        self.content.unwrap_or_default()
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Completes the conversation. Generation should halt before any of the
    /// `stop` sequences.
    async fn complete_chat(&self, messages: &[Message], stop: &[String])
        -> Result<ModelCompletion>;

    /// Identifier reported in the agent configuration.
    fn model_name(&self) -> &str {
        "unknown"
    }

    fn sampling_temperature(&self) -> Option<f32> {
        None
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> QabotError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return QabotError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    QabotError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    temperature: f32,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            api_key.into(),
            DEFAULT_MODEL.to_string(),
            DEFAULT_TEMPERATURE,
            "https://api.openai.com/v1".to_string(),
            None,
            Duration::from_secs(60),
        )
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        if !cfg.provider.eq_ignore_ascii_case("openai") {
            return Err(QabotError::Config(format!(
                "unsupported model provider `{}`, only `openai` is available",
                cfg.provider
            )));
        }
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            QabotError::LanguageModel("missing OpenAI API key in model config".into())
        })?;
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::build(
            api_key,
            cfg.model.clone(),
            cfg.temperature,
            base_url,
            cfg.organization.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    /// Reads `QABOT_API_KEY` (or `OPENAI_API_KEY`) and uses the default model settings.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("QABOT_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| QabotError::LanguageModel("OPENAI_API_KEY not set".into()))?;
        Self::new(api_key)
    }

    fn build(
        api_key: String,
        model: String,
        temperature: f32,
        base_url: String,
        organization: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| QabotError::LanguageModel(format!("http client error: {err}")))?,
            model,
            temperature,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    fn payload(&self, messages: &[Message], stop: &[String]) -> Value {
        let messages: Vec<OpenAiMessage> = messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if !stop.is_empty() {
            payload["stop"] = json!(stop);
        }
        payload
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn sampling_temperature(&self) -> Option<f32> {
        Some(self.temperature)
    }

    async fn complete_chat(
        &self,
        messages: &[Message],
        stop: &[String],
    ) -> Result<ModelCompletion> {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&self.payload(messages, stop))
            .send()
            .await
            .map_err(|err| QabotError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            QabotError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| QabotError::LanguageModel("OpenAI returned no choices".into()))?;

        Ok(ModelCompletion {
            content: first.message.content,
        })
    }
}

/// A deterministic model used for tests and demos.
///
/// Replies are handed out in order. Every request is recorded so tests can
/// inspect the prompts the agent produced.
#[derive(Debug, Default)]
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut locked) = self.responses.lock() {
            locked.push_back(response.into());
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|locked| locked.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|l| l.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete_chat(
        &self,
        messages: &[Message],
        _stop: &[String],
    ) -> Result<ModelCompletion> {
        self.requests
            .lock()
            .map_err(|_| QabotError::LanguageModel("stub model poisoned".into()))?
            .push(messages.to_vec());
        let mut locked = self
            .responses
            .lock()
            .map_err(|_| QabotError::LanguageModel("stub model poisoned".into()))?;
        let raw = locked.pop_front().ok_or_else(|| {
            QabotError::LanguageModel("StubModel ran out of scripted responses".into())
        })?;
        Ok(ModelCompletion::text(raw))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
