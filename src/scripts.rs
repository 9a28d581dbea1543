//! Script generation — topic in, ordered (sentiment, text) turns out.
//!
//! One call per room, before the discussion starts. Retries rotate through
//! the credential pool from a random offset; every failure path degrades to
//! an empty script, which downstream components treat as "room has no
//! script" rather than an error.

use crate::store::ScriptTurn;
use crate::textgen::TextGenClient;

fn system_prompt(topic: &str, num_turns: usize) -> String {
    format!(
        "You are an expert debate script writer. \
         Generate a realistic Group Discussion script on the topic: '{topic}'. \
         Create exactly {num_turns} turns. \
         Include 3 distinct perspectives: 'For', 'Against', and 'Neutral'. \
         The conversation should flow naturally, with participants building on \
         or countering previous points. \
         Do NOT include speaker names, just the sentiment and the text. \
         Output MUST be a valid JSON array of objects with keys 'sentiment' and 'text'. \
         Example: [{{\"sentiment\": \"For\", \"text\": \"I believe...\"}}, \
         {{\"sentiment\": \"Against\", \"text\": \"But consider...\"}}]"
    )
}

/// Pull script turns out of a completion payload: either a direct array or
/// the first array-valued field of an object.
fn extract_turns(value: &serde_json::Value) -> Vec<ScriptTurn> {
    let array = match value {
        serde_json::Value::Array(items) => Some(items),
        serde_json::Value::Object(map) => map.values().find_map(|v| v.as_array()),
        _ => None,
    };

    array
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Generate a discussion script for a topic. Fails closed: no credentials,
/// repeated upstream failures, or empty parses all yield an empty script.
pub async fn generate_topic_script(
    client: &TextGenClient,
    topic: &str,
    num_turns: usize,
) -> Vec<ScriptTurn> {
    let pool_size = client.pool_size();
    if pool_size == 0 {
        tracing::error!("no text-generation credentials available for script generation");
        return vec![];
    }

    let prompt = system_prompt(topic, num_turns);
    let start = client.random_offset();
    let max_attempts = pool_size.max(3);

    for attempt in 0..max_attempts {
        let Some(key) = client.key_at(start, attempt) else {
            break;
        };
        tracing::debug!(topic, attempt, "generating script");

        match client
            .chat_json(key, &prompt, &format!("Topic: {topic}"), 0.7)
            .await
        {
            Ok(value) => {
                let turns = extract_turns(&value);
                if turns.is_empty() {
                    tracing::warn!(topic, attempt, "completion parsed but held no turn array");
                } else {
                    tracing::info!(topic, turns = turns.len(), "generated script");
                    return turns;
                }
            }
            Err(e) => {
                tracing::warn!(topic, attempt, "script generation attempt failed: {e}");
            }
        }
    }

    tracing::error!(topic, "script generation exhausted all credential rotations");
    vec![]
}
