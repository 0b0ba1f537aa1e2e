//! LM client trait and the Anthropic provider implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{Completion, ModelSpec, ModelTier};

/// Single-shot completion at a named logical tier.
///
/// Implementations map tier names to concrete models. Failures follow the
/// closed taxonomy: [`Error::RateLimited`] (retryable), [`Error::Model`]
/// (transient), [`Error::InvalidResponse`] (non-retryable).
#[async_trait]
pub trait LmClient: Send + Sync {
    async fn complete(
        &self,
        tier: ModelTier,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Completion>;
}

/// Configuration for provider clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key.
    pub api_key: String,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Tier → concrete model mapping.
    pub models: HashMap<ModelTier, ModelSpec>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        let models = ModelTier::ESCALATION
            .iter()
            .map(|tier| (*tier, ModelSpec::default_for(*tier)))
            .collect();
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 120,
            models,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Override the concrete model behind a tier.
    pub fn with_model(mut self, spec: ModelSpec) -> Self {
        self.models.insert(spec.tier, spec);
        self
    }
}

/// Anthropic Claude client implementing the [`LmClient`] port.
pub struct AnthropicLmClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicLmClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn model_for(&self, tier: ModelTier) -> ModelSpec {
        self.config
            .models
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| ModelSpec::default_for(tier))
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LmClient for AnthropicLmClient {
    async fn complete(
        &self,
        tier: ModelTier,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Completion> {
        let spec = self.model_for(tier);

        let api_request = AnthropicRequest {
            model: spec.id.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: max_output_tokens.min(spec.max_output),
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::model(format!("HTTP request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(Error::rate_limited(retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::model(format!("failed to read response: {e}")))?;

        if status.is_server_error() {
            return Err(Error::model(format!("provider error ({status}): {body}")));
        }
        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::invalid_response(format!(
                    "API error ({}): {}",
                    error.error.error_type, error.error.message
                )));
            }
            return Err(Error::invalid_response(format!(
                "API error ({status}): {body}"
            )));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::invalid_response(format!("failed to parse response: {e}")))?;

        let text = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        })
    }
}
