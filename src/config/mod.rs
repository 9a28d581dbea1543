//! Configuration types, defaults, and environment loading.
//!
//! Every field has a serde default so the scheduler runs with zero
//! configuration; overrides come from `GD_*` environment variables
//! (e.g. `GD_PORT`, `GD_AI_API_KEYS`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdConfig {
    /// Bind address (default: "127.0.0.1")
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Server port (default: 8700)
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database URL (default: "sqlite:gd-scheduler.db?mode=rwc")
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Comma-separated credential pool for the text-generation service.
    /// Empty pool means script generation fails closed (empty scripts).
    #[serde(default)]
    pub ai_api_keys: String,

    /// OpenAI-compatible chat-completions endpoint.
    #[serde(default = "default_ai_base_url")]
    pub ai_base_url: String,

    /// Model name sent to the text-generation service.
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Fixed room size — humans plus simulated fill (default: 5).
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,

    /// Lobby countdown before a waiting session goes active (default: 300s).
    #[serde(default = "default_lobby_wait_secs")]
    pub lobby_wait_secs: u64,

    /// Number of script turns requested per room (default: 15).
    #[serde(default = "default_script_turns")]
    pub script_turns: usize,

    /// Pause before a simulated speaker delivers its line (default: 7000ms).
    #[serde(default = "default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,

    /// Silence gap that triggers a breaker turn on transcript reads (default: 8000ms).
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,

    /// Allowed CORS origins — no cross-origin requests allowed by default.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8700
}

fn default_database_url() -> String {
    "sqlite:gd-scheduler.db?mode=rwc".to_string()
}

fn default_ai_base_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_ai_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_room_capacity() -> usize {
    5
}

fn default_lobby_wait_secs() -> u64 {
    300
}

fn default_script_turns() -> usize {
    15
}

fn default_pacing_interval_ms() -> u64 {
    7_000
}

fn default_silence_threshold_ms() -> u64 {
    8_000
}

impl Default for GdConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            database_url: default_database_url(),
            ai_api_keys: String::new(),
            ai_base_url: default_ai_base_url(),
            ai_model: default_ai_model(),
            room_capacity: default_room_capacity(),
            lobby_wait_secs: default_lobby_wait_secs(),
            script_turns: default_script_turns(),
            pacing_interval_ms: default_pacing_interval_ms(),
            silence_threshold_ms: default_silence_threshold_ms(),
            allowed_origins: vec![],
        }
    }
}

impl GdConfig {
    /// Load configuration from `GD_*` environment variables over defaults.
    pub fn load() -> Result<Self> {
        let source = config::Environment::with_prefix("GD")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("allowed_origins");

        config::Config::builder()
            .add_source(source)
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }

    /// Credential pool, trimmed, empty entries dropped.
    pub fn api_keys(&self) -> Vec<String> {
        self.ai_api_keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Conversational pause before a simulated turn fires.
    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    /// Lobby countdown duration.
    pub fn lobby_wait(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lobby_wait_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_source_constants() {
        let cfg = GdConfig::default();
        assert_eq!(cfg.room_capacity, 5);
        assert_eq!(cfg.lobby_wait_secs, 300);
        assert_eq!(cfg.script_turns, 15);
        assert_eq!(cfg.pacing_interval_ms, 7_000);
        assert_eq!(cfg.silence_threshold_ms, 8_000);
    }

    #[test]
    fn test_api_keys_split_and_trim() {
        let cfg = GdConfig {
            ai_api_keys: " key-a, key-b ,,key-c".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.api_keys(), vec!["key-a", "key-b", "key-c"]);
    }

    #[test]
    fn test_empty_pool() {
        let cfg = GdConfig::default();
        assert!(cfg.api_keys().is_empty());
    }
}
