//! HTTP surface powered by axum.
//!
//! Serves:
//! - `POST /gd-session/join-lobby`
//! - `GET  /gd-session/status`
//! - `GET  /gd-session/my-room`
//! - `POST /gd-session/toggle-user-talking`
//! - `POST /gd-transcript/add`
//! - `GET  /gd-transcript/{sessionId}`
//! - `POST /gd-evaluation/evaluate`
//! - `GET  /health`

use crate::error::Result;
use crate::evaluation::{self, EvaluationOutcome};
use crate::lobby::{self, RoomLookup};
use crate::pacer;
use crate::services::AppContext;
use crate::store::{fmt_ts, TranscriptEntry};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Session-level topic shown to clients; the room topic is authoritative.
const TOPIC_PLACEHOLDER: &str = "Topic will be assigned per room";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinLobbyRequest {
    participant_id: String,
    peer_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyRoomQuery {
    session_id: String,
    participant_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleTalkingRequest {
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    is_talking: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTranscriptRequest {
    session_id: String,
    room_id: String,
    speaker_id: String,
    text: String,
    /// Client timestamp; defaults to the server clock.
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptQuery {
    room_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptWire {
    id: i64,
    session_id: String,
    room_id: String,
    speaker_id: String,
    text: String,
    timestamp: String,
}

impl From<TranscriptEntry> for TranscriptWire {
    fn from(entry: TranscriptEntry) -> Self {
        Self {
            id: entry.id,
            session_id: entry.session_id,
            room_id: entry.room_id,
            speaker_id: entry.speaker_id,
            text: entry.text,
            timestamp: fmt_ts(entry.timestamp),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    session_id: String,
    room_id: String,
    peer_id: String,
}

/// Build the axum router for the scheduler.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = if ctx.config.allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<_> = ctx
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/gd-session/join-lobby", post(join_lobby))
        .route("/gd-session/status", get(session_status))
        .route("/gd-session/my-room", get(my_room))
        .route("/gd-session/toggle-user-talking", post(toggle_user_talking))
        .route("/gd-transcript/add", post(add_transcript))
        .route("/gd-transcript/{sessionId}", get(get_transcripts))
        .route("/gd-evaluation/evaluate", post(evaluate))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(ctx)
}

/// Start the scheduler server. Runs until the listener fails.
pub async fn start_server(ctx: AppContext) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.bind, ctx.config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let app = build_router(ctx);
    tracing::info!("GD scheduler listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn join_lobby(
    State(ctx): State<AppContext>,
    Json(req): Json<JoinLobbyRequest>,
) -> Result<Json<serde_json::Value>> {
    let outcome = lobby::join_lobby(&ctx, &req.participant_id, &req.peer_id, &req.name).await?;
    Ok(Json(serde_json::json!({
        "sessionId": outcome.session_id,
        "startTime": fmt_ts(outcome.start_time),
        "topic": TOPIC_PLACEHOLDER,
        "message": "Joined lobby",
    })))
}

async fn session_status(
    State(ctx): State<AppContext>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>> {
    let outcome = lobby::session_status(&ctx, &query.session_id).await?;
    Ok(Json(serde_json::json!({
        "sessionId": outcome.session_id,
        "status": outcome.status.as_str(),
        "startTime": fmt_ts(outcome.start_time),
        "secondsRemaining": outcome.seconds_remaining,
        "topic": TOPIC_PLACEHOLDER,
    })))
}

async fn my_room(
    State(ctx): State<AppContext>,
    Query(query): Query<MyRoomQuery>,
) -> Result<Json<serde_json::Value>> {
    let body = match lobby::my_room(&ctx, &query.session_id, &query.participant_id).await? {
        RoomLookup::Waiting => serde_json::json!({
            "status": "waiting",
            "message": "Room not allocated yet",
        }),
        RoomLookup::Allocated(room) => serde_json::json!({
            "status": "allocated",
            "roomId": room.room_id,
            "participants": room.participants,
            "aiCount": room.ai_count,
        }),
    };
    Ok(Json(body))
}

async fn toggle_user_talking(
    State(ctx): State<AppContext>,
    Json(req): Json<ToggleTalkingRequest>,
) -> Result<Json<serde_json::Value>> {
    lobby::set_talking(&ctx, &req.room_id, req.is_talking).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "isTalking": req.is_talking,
    })))
}

async fn add_transcript(
    State(ctx): State<AppContext>,
    Json(req): Json<AddTranscriptRequest>,
) -> Result<Json<serde_json::Value>> {
    let entry = TranscriptEntry {
        id: 0,
        session_id: req.session_id,
        room_id: req.room_id.clone(),
        speaker_id: req.speaker_id,
        text: req.text,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    ctx.store.insert_transcript(&entry).await?;

    // Every insertion nudges the pacer for that room.
    if !req.room_id.is_empty() {
        pacer::defer_turn(&ctx, &req.room_id, false);
    }

    Ok(Json(serde_json::json!({ "message": "Transcript saved" })))
}

async fn get_transcripts(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Result<Json<Vec<TranscriptWire>>> {
    let entries = ctx
        .store
        .transcripts_for(&session_id, query.room_id.as_deref())
        .await?;

    // Silence breaker: a stale newest entry means nobody has spoken for a
    // while — nudge the pacer once.
    if let (Some(room_id), Some(last)) = (query.room_id.as_deref(), entries.last()) {
        let gap_ms = (Utc::now() - last.timestamp).num_milliseconds();
        if gap_ms > ctx.config.silence_threshold_ms as i64 {
            tracing::debug!(room = %room_id, gap_ms, "silence detected on transcript read");
            pacer::defer_turn(&ctx, room_id, true);
        }
    }

    Ok(Json(entries.into_iter().map(TranscriptWire::from).collect()))
}

async fn evaluate(
    State(ctx): State<AppContext>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationOutcome>> {
    let outcome = evaluation::evaluate(&ctx, &req.session_id, &req.room_id, &req.peer_id).await?;
    Ok(Json(outcome))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "gd-scheduler",
    }))
}
