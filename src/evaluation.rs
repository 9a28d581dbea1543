//! Post-hoc evaluation of one participant's transcript contribution.
//!
//! Off the hot scheduling path. Builds a labeled transcript, asks the
//! text-generation service for category scores, and persists the result.
//! A participant who never spoke gets a deterministic zero-score response
//! without any upstream call.

use crate::error::{GdError, Result};
use crate::services::AppContext;
use crate::store::GdResult;
use chrono::Utc;
use serde_json::Value;

const FALLBACK_IDENTITY: &str = "unknown@student.com";

/// Parsed evaluation outcome returned to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationOutcome {
    pub scores: serde_json::Map<String, Value>,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

fn zero_score_outcome() -> EvaluationOutcome {
    let mut scores = serde_json::Map::new();
    for category in ["Participation", "Creativity", "Communication", "Leadership"] {
        scores.insert(category.to_string(), Value::from(0));
    }
    EvaluationOutcome {
        scores,
        feedback: "You did not speak during the session.".to_string(),
        strengths: vec![],
        improvements: vec!["Speak up to be heard!".to_string()],
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Score a participant's performance in a room.
pub async fn evaluate(
    ctx: &AppContext,
    session_id: &str,
    room_id: &str,
    peer_id: &str,
) -> Result<EvaluationOutcome> {
    let transcripts = ctx.store.transcripts_for(session_id, Some(room_id)).await?;
    if transcripts.is_empty() {
        return Err(GdError::NotFound(format!(
            "transcripts for session {session_id}"
        )));
    }

    let mut conversation = String::new();
    let mut target_spoke = false;
    for entry in &transcripts {
        let prefix = if entry.speaker_id == peer_id {
            target_spoke = true;
            "TARGET_STUDENT"
        } else if entry.speaker_id.starts_with("ai-") {
            "AI_Participant"
        } else {
            "Student"
        };
        conversation.push_str(prefix);
        conversation.push_str(": ");
        conversation.push_str(&entry.text);
        conversation.push('\n');
    }

    if !target_spoke {
        tracing::info!(session = %session_id, peer = %peer_id, "target never spoke, zero-score result");
        return Ok(zero_score_outcome());
    }

    let Some(key) = ctx.textgen.pick_key() else {
        return Err(GdError::Upstream("AI evaluation failed".to_string()));
    };
    let key = key.to_string();

    let prompt = format!(
        "Evaluate 'TARGET_STUDENT' performance (0-10) in this GD.\n\
         Categories: Participation, Uniqueness, Creativity, Choice of Words, Leadership, Listening.\n\
         Conversation:\n{conversation}\n\
         Return pure JSON: {{ \"scores\": {{...}}, \"feedback\": \"...\", \
         \"strengths\": [...], \"improvements\": [...] }}"
    );

    let parsed = ctx
        .textgen
        .chat_json(&key, "Return only JSON.", &prompt, 0.3)
        .await
        .map_err(|e| {
            tracing::error!(session = %session_id, "evaluation call failed: {e}");
            GdError::Upstream("AI evaluation failed".to_string())
        })?;

    let outcome = EvaluationOutcome {
        scores: parsed
            .get("scores")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        feedback: parsed
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or("Analysis complete.")
            .to_string(),
        strengths: string_list(parsed.get("strengths")),
        improvements: string_list(parsed.get("improvements")),
    };

    // Durable identity comes from the participant record; the scheduler
    // itself only ever sees the transport-level peer id.
    let student_email = ctx
        .store
        .find_participant_by_peer(session_id, peer_id)
        .await?
        .map(|p| p.participant_id)
        .unwrap_or_else(|| FALLBACK_IDENTITY.to_string());

    ctx.store
        .insert_result(&GdResult {
            student_email,
            session_id: session_id.to_string(),
            scores: outcome.scores.clone(),
            feedback: outcome.feedback.clone(),
            strengths: outcome.strengths.clone(),
            improvements: outcome.improvements.clone(),
            created_at: Utc::now(),
        })
        .await?;

    Ok(outcome)
}
