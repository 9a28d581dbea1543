//! Turn pacer — releases one script line at a time into a room's transcript.
//!
//! Per room the machine is Idle → Pending (delayed turn scheduled) → Idle.
//! A process-wide in-flight set keeps at most one pacer active per room;
//! the pacing sleep is the only intentional suspension point. After the
//! sleep the room is re-read: a moved cursor or a talking human abandons
//! the turn without advancing anything.

use crate::error::Result;
use crate::services::AppContext;
use crate::store::TranscriptEntry;
use chrono::Utc;
use rand::seq::IndexedRandom;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Process-wide set of rooms with a pacer turn in flight. The only
/// in-memory mutable shared state in the scheduler.
#[derive(Clone, Default)]
pub struct InFlightRooms {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InFlightRooms {
    /// Claim a room for turn processing. `None` when another pacer already
    /// holds it. The claim releases on drop, so every exit path — including
    /// errors — frees the room.
    pub fn try_claim(&self, room_id: &str) -> Option<InFlightClaim> {
        let mut set = self.inner.lock().expect("in-flight room set poisoned");
        if set.insert(room_id.to_string()) {
            Some(InFlightClaim {
                rooms: self.clone(),
                room_id: room_id.to_string(),
            })
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn is_claimed(&self, room_id: &str) -> bool {
        self.inner
            .lock()
            .expect("in-flight room set poisoned")
            .contains(room_id)
    }
}

/// RAII release for an in-flight room claim.
pub struct InFlightClaim {
    rooms: InFlightRooms,
    room_id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.rooms
            .inner
            .lock()
            .expect("in-flight room set poisoned")
            .remove(&self.room_id);
    }
}

/// Queue one pacer invocation on the deferred runner. Entry point for the
/// transcript insert path, the silence breaker, allocation, and the pacer's
/// own follow-up turn.
pub fn defer_turn(ctx: &AppContext, room_id: &str, is_silence_breaker: bool) {
    // Boxed dyn future: process_turn defers itself, so the concrete future
    // type must not nest.
    let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> = Box::pin(
        process_turn(ctx.clone(), room_id.to_string(), is_silence_breaker),
    );
    ctx.tasks.spawn(fut);
}

/// Deliver the next unplayed script line to the room, if nothing interferes.
pub async fn process_turn(ctx: AppContext, room_id: String, is_silence_breaker: bool) {
    let Some(_claim) = ctx.rooms_in_flight.try_claim(&room_id) else {
        tracing::debug!(room = %room_id, "pacer already in flight, skipping");
        return;
    };

    if is_silence_breaker {
        tracing::debug!(room = %room_id, "silence breaker engaged");
    }

    if let Err(e) = run_turn(&ctx, &room_id).await {
        tracing::error!(room = %room_id, "turn processing failed: {e}");
    }
}

async fn run_turn(ctx: &AppContext, room_id: &str) -> Result<()> {
    let Some(room) = ctx.store.get_room(room_id).await? else {
        return Ok(());
    };
    let cursor = room.script_index;
    if room.script.is_empty() || cursor as usize >= room.script.len() {
        tracing::debug!(room = %room_id, "script finished or absent");
        return Ok(());
    }

    // Natural conversational pause before the simulated speaker comes in.
    tokio::time::sleep(ctx.config.pacing_interval()).await;

    let Some(current) = ctx.store.get_room(room_id).await? else {
        return Ok(());
    };
    if current.script_index != cursor {
        tracing::debug!(room = %room_id, "cursor advanced during pause, abandoning turn");
        return Ok(());
    }
    if current.user_talking {
        tracing::debug!(room = %room_id, "user barge-in, abandoning turn");
        return Ok(());
    }

    let turn = &room.script[cursor as usize];

    let bots = ctx.store.simulated_members(room_id).await?;
    let Some(speaker) = bots.choose(&mut rand::rng()) else {
        tracing::warn!(room = %room_id, "no simulated participants in room");
        return Ok(());
    };

    ctx.store
        .insert_transcript(&TranscriptEntry {
            id: 0,
            session_id: room.session_id.clone(),
            room_id: room_id.to_string(),
            speaker_id: speaker.peer_id.clone(),
            text: turn.text.clone(),
            timestamp: Utc::now(),
        })
        .await?;
    tracing::info!(room = %room_id, sentiment = %turn.sentiment, "simulated turn delivered");

    if !ctx.store.advance_script_index(room_id, cursor).await? {
        // Someone else produced this index between our re-check and the
        // increment. The entry already landed; accepted at-least-once.
        tracing::warn!(room = %room_id, cursor, "cursor moved before increment");
        return Ok(());
    }

    // A simulated entry re-triggers pacing the same way a human one does.
    defer_turn(ctx, room_id, false);
    Ok(())
}
