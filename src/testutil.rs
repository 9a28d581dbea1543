//! Shared helpers for unit tests: in-memory store, shrunken timers.

use crate::config::GdConfig;
use crate::services::AppContext;
use crate::store::Store;

/// Config with intervals short enough for tests but long enough that a
/// barge-in can land inside the pacing pause.
pub fn fast_config() -> GdConfig {
    GdConfig {
        pacing_interval_ms: 40,
        silence_threshold_ms: 50,
        ..Default::default()
    }
}

/// Fast config whose lobby countdown has already elapsed at join time.
pub fn elapsed_lobby_config() -> GdConfig {
    GdConfig {
        lobby_wait_secs: 0,
        ..fast_config()
    }
}

/// Context over a fresh in-memory store, no upstream credentials.
pub async fn test_context() -> AppContext {
    test_context_with(fast_config()).await
}

pub async fn test_context_with(config: GdConfig) -> AppContext {
    let store = Store::connect_in_memory().await.expect("in-memory store");
    store.migrate().await.expect("migrate");
    AppContext::new(config, store)
}

/// Context wired to a mock text-generation endpoint with one credential.
pub async fn test_context_with_upstream(base_url: &str) -> AppContext {
    test_context_with(GdConfig {
        ai_api_keys: "test-key".to_string(),
        ai_base_url: base_url.to_string(),
        ..fast_config()
    })
    .await
}
