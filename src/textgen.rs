//! Text-generation service client.
//!
//! Speaks the OpenAI chat-completions protocol against any compatible
//! endpoint (Groq by default). Holds the rotating credential pool resolved
//! once at startup; callers pick a key per attempt, so selection stays a
//! pure function of the pool and an attempt index.

use crate::config::GdConfig;
use crate::error::{GdError, Result};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

/// Client for the text-generation service. Cheap to clone.
#[derive(Clone)]
pub struct TextGenClient {
    client: Client,
    keys: Arc<Vec<String>>,
    base_url: String,
    model: String,
}

impl TextGenClient {
    pub fn new(config: &GdConfig) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            keys: Arc::new(config.api_keys()),
            base_url: config.ai_base_url.clone(),
            model: config.ai_model.clone(),
        }
    }

    /// Number of credentials in the pool.
    pub fn pool_size(&self) -> usize {
        self.keys.len()
    }

    /// Key for a given attempt, rotating from a starting offset.
    pub fn key_at(&self, start: usize, attempt: usize) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        Some(self.keys[(start + attempt) % self.keys.len()].as_str())
    }

    /// Pseudo-random offset into the pool. 0 when the pool is empty.
    pub fn random_offset(&self) -> usize {
        if self.keys.is_empty() {
            0
        } else {
            rand::rng().random_range(0..self.keys.len())
        }
    }

    /// One key chosen uniformly at random, for single-shot calls.
    pub fn pick_key(&self) -> Option<&str> {
        self.key_at(self.random_offset(), 0)
    }

    /// Single chat-completion call in JSON-object mode; returns the parsed
    /// message content. Network, HTTP, and parse failures all surface as
    /// `Upstream` so callers can degrade uniformly.
    pub async fn chat_json(
        &self,
        api_key: &str,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<serde_json::Value> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key.trim())
            .json(&request)
            .send()
            .await
            .map_err(|e| GdError::Upstream(format!("text-generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GdError::Upstream(format!(
                "text-generation returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GdError::Upstream(format!("malformed completion payload: {e}")))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GdError::Upstream("empty completion content".to_string()));
        }

        serde_json::from_str(content)
            .map_err(|e| GdError::Upstream(format!("completion content is not JSON: {e}")))
    }
}
