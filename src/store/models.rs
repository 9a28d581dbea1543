//! Persisted entity models for the five scheduler collections.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session. The waiting → active transition is
/// monotonic and performed only through a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => SessionStatus::Active,
            _ => SessionStatus::Waiting,
        }
    }
}

/// A scheduled cohort of participants, from waiting lobby to active rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
}

/// Participant role — live human or script-driven filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Human,
    Ai,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Human => "human",
            ParticipantRole::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ai" => ParticipantRole::Ai,
            _ => ParticipantRole::Human,
        }
    }
}

/// A member of a session. `room_id` is null until allocation and is
/// assigned exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub session_id: String,
    /// Opaque transport handle used for live signaling; not interpreted here.
    pub peer_id: String,
    pub name: String,
    pub role: ParticipantRole,
    pub room_id: Option<String>,
}

/// One pre-generated conversation turn: a stance plus the line itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptTurn {
    #[serde(default = "default_sentiment")]
    pub sentiment: String,
    #[serde(default = "default_turn_text")]
    pub text: String,
}

fn default_sentiment() -> String {
    "Neutral".to_string()
}

fn default_turn_text() -> String {
    "...".to_string()
}

/// A fixed-capacity discussion group sharing one script and one transcript.
/// After creation only `script_index` and `user_talking` change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub session_id: String,
    /// Member peer ids, humans first then simulated, insertion order.
    pub participants: Vec<String>,
    pub ai_count: i64,
    pub topic: String,
    pub script: Vec<ScriptTurn>,
    /// Next unplayed script index; monotonically increasing.
    pub script_index: i64,
    /// Live barge-in signal — true while a human is speaking.
    pub user_talking: bool,
}

/// Append-only spoken line, human or simulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Auto-assigned row id; 0 until persisted.
    #[serde(default)]
    pub id: i64,
    pub session_id: String,
    pub room_id: String,
    pub speaker_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Write-once evaluation outcome for a single participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdResult {
    pub student_email: String,
    pub session_id: String,
    pub scores: serde_json::Map<String, serde_json::Value>,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Format a timestamp for storage. Fixed millisecond precision so the
/// TEXT column sorts chronologically.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, tolerating foreign RFC-3339 offsets.
pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("unparseable stored timestamp {:?}: {}", raw, e);
            DateTime::<Utc>::MIN_UTC
        })
}
