//! OpenClaw text-generation client.
//!
//! OpenClaw exposes an OpenAI-chat-completions-compatible endpoint; all
//! three analyst roles route through this single client rather than
//! each holding a separate provider integration.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;

const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

pub struct OpenclawClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenclawClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()
            .map_err(EngineError::Http)?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Send a single-turn completion request with retry + backoff.
    /// Returns the raw text response; callers apply their own parsing.
    pub async fn complete(&self, system: &str, user_message: &str) -> Result<String, EngineError> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "retrying OpenClaw call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .map_err(EngineError::Http)?;
                        let text = body
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .unwrap_or_default();
                        return Ok(text);
                    }

                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "retryable OpenClaw error");
                        last_error = format!("HTTP {status}: {error_text}");
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    return Err(EngineError::AnalystFailure {
                        role: "openclaw".to_string(),
                        message: format!("HTTP {status}: {error_text}"),
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "OpenClaw request failed");
                    last_error = format!("request error: {e}");
                    continue;
                }
            }
        }

        Err(EngineError::AnalystFailure {
            role: "openclaw".to_string(),
            message: format!("failed after {MAX_RETRIES} retries: {last_error}"),
        })
    }
}
