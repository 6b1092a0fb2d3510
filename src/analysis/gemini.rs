//! Client for the Gemini `generateContent` REST endpoint.

use crate::error::{Result, SystemError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default Gemini model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// A service that turns a prompt into prose.
///
/// Implementations report every failure of the remote service as
/// [`SystemError::Upstream`] so callers can degrade gracefully.
#[async_trait]
pub trait TextService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Gemini connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key, sent as the `key` query parameter
    pub api_key: Option<String>,
    /// Model name (e.g. "gemini-2.0-flash")
    pub model: String,
    /// Scheme and host of the API
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

impl GeminiConfig {
    /// Set the API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Full `generateContent` URL without the key.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// Single-turn request carrying one text prompt.
    pub fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate.
    pub fn first_text(&self) -> Result<&str> {
        let candidate = self
            .candidates
            .first()
            .ok_or_else(|| SystemError::upstream_error("response has no candidates"))?;

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            warn!("Gemini response was truncated at the token limit");
        }

        candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.first())
            .and_then(|part| part.text.as_deref())
            .ok_or_else(|| SystemError::upstream_error("candidate has no text"))
    }
}

/// HTTP client for Gemini.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a client with transport defaults.
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }
}

#[async_trait]
impl TextService for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| SystemError::upstream_error("no Gemini API key configured"))?;

        debug!("Sending {} byte prompt to {}", prompt.len(), self.config.model);

        let response = self
            .http
            .post(self.config.endpoint())
            .query(&[("key", api_key)])
            .json(&GenerateContentRequest::from_prompt(prompt))
            .send()
            .await
            .map_err(|e| SystemError::upstream_error(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SystemError::upstream_error(format!("failed to read body: {}", e)))?;

        if status != reqwest::StatusCode::OK {
            return Err(SystemError::upstream_error(format!(
                "Gemini API returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            SystemError::upstream_error(format!("malformed response ({}): {}", e, body))
        })?;

        parsed.first_text().map(str::to_string)
    }
}
