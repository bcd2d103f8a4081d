//! Reasoning service collaborator and its OpenAI-compatible client.

use crate::config::loader::ReasoningConfig;
use crate::config::types::ReasoningError;
use crate::tutor::context::ChatMessage;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// Produces the next tutor reply for a rendered conversation.
pub trait ReasoningService: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ReasoningError>;
}

/// Chat-completions client. Requests are bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct OpenAiReasoningClient {
    client: Client,
    api_key: Option<String>,
    api_key_env: String,
    api_base: String,
    model: String,
    timeout_ms: u64,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiReasoningClient {
    pub fn new(api_key: Option<String>, model: String, timeout_ms: u64) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ReasoningError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            model,
            timeout_ms,
            temperature: None,
            max_tokens: None,
        })
    }

    /// A missing key is not an error here; each call fails with `NotConfigured`.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let mut client = Self::new(config.api_key(), config.model.clone(), config.timeout_ms)?
            .with_api_base(config.api_base.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
        client.api_key_env = config.api_key_env.clone();
        Ok(client)
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }

        body
    }

    fn transport_error(&self, err: reqwest::Error) -> ReasoningError {
        if err.is_timeout() {
            ReasoningError::Timeout(self.timeout_ms)
        } else {
            ReasoningError::Transport(err.to_string())
        }
    }
}

impl ReasoningService for OpenAiReasoningClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ReasoningError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ReasoningError::NotConfigured(format!("{} is not set", self.api_key_env))
        })?;

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(messages);
        log::debug!(
            "Requesting completion from {} ({} messages, model {})",
            url,
            messages.len(),
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            log::warn!("Reasoning service returned {}: {}", status, text);
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: Value = response.json().map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout(self.timeout_ms)
            } else {
                ReasoningError::MalformedReply(e.to_string())
            }
        })?;
        parse_completion(&payload)
    }
}

/// Extracts `choices[0].message.content`.
pub fn parse_completion(payload: &Value) -> Result<String, ReasoningError> {
    let content = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| ReasoningError::MalformedReply("missing choices[0].message.content".into()))?;

    match content {
        Value::Null => Err(ReasoningError::EmptyReply),
        Value::String(text) if text.trim().is_empty() => Err(ReasoningError::EmptyReply),
        Value::String(text) => Ok(text.trim().to_string()),
        other => Err(ReasoningError::MalformedReply(format!(
            "content is not a string: {}",
            other
        ))),
    }
}
