//! Room allocator — partitions a session's waiting humans into rooms of a
//! fixed capacity, tops each room up with simulated participants, attaches
//! a generated script, and kicks off pacing.
//!
//! Rooms are processed in parallel because script generation dominates the
//! latency. One room failing is logged and skipped; its siblings proceed.

use crate::error::Result;
use crate::pacer;
use crate::scripts;
use crate::services::AppContext;
use crate::store::{Participant, ParticipantRole, Room, TranscriptEntry};
use chrono::Utc;
use rand::seq::IndexedRandom;
use uuid::Uuid;

/// Fixed discussion topic set; each room draws one at random.
pub const GD_TOPICS: &[&str] = &[
    "Is remote work the future of employment?",
    "Should social media platforms verify every user's identity?",
    "Does artificial intelligence create more jobs than it destroys?",
    "Should college education be free for everyone?",
    "Is space exploration a justified use of public money?",
    "Do electric vehicles actually help the environment?",
    "Should voting be made compulsory?",
    "Is a cashless economy good for society?",
    "Should exams be replaced with continuous assessment?",
    "Does globalization help or hurt developing countries?",
];

/// Allocate every unassigned human in a session into rooms. Returns the
/// number of rooms successfully created.
pub async fn allocate_rooms(ctx: AppContext, session_id: String) -> usize {
    let humans = match ctx.store.unassigned_humans(&session_id).await {
        Ok(humans) => humans,
        Err(e) => {
            tracing::error!(session = %session_id, "failed to load waiting participants: {e}");
            return 0;
        }
    };

    if humans.is_empty() {
        tracing::info!(session = %session_id, "no waiting participants to allocate");
        return 0;
    }

    tracing::info!(
        session = %session_id,
        humans = humans.len(),
        "starting parallel room allocation"
    );

    let capacity = ctx.config.room_capacity.max(1);
    let mut handles = Vec::new();
    for group in humans.chunks(capacity) {
        let ctx = ctx.clone();
        let session_id = session_id.clone();
        let group = group.to_vec();
        handles.push(tokio::spawn(async move {
            build_room(ctx, session_id, group).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(room_id)) => {
                created += 1;
                tracing::info!(room = %room_id, "room allocation completed");
            }
            Ok(Err(e)) => tracing::error!(session = %session_id, "room allocation failed: {e}"),
            Err(e) => tracing::error!(session = %session_id, "room allocation task panicked: {e}"),
        }
    }

    tracing::info!(session = %session_id, created, "allocation finished");
    created
}

/// Create one room from a group of humans: assign them, fill the remainder
/// with simulated participants, generate the script, persist the room, and
/// seed the opening greeting.
async fn build_room(
    ctx: AppContext,
    session_id: String,
    group: Vec<Participant>,
) -> Result<String> {
    let capacity = ctx.config.room_capacity;
    let ai_needed = capacity.saturating_sub(group.len());
    let room_id = Uuid::new_v4().to_string();

    // Humans first, then simulated fill; insertion order is the member order.
    let mut members = Vec::with_capacity(capacity);
    for human in &group {
        if !ctx
            .store
            .assign_room(&session_id, &human.participant_id, &room_id)
            .await?
        {
            tracing::warn!(
                participant = %human.participant_id,
                "participant gained a room mid-allocation, keeping existing assignment"
            );
        }
        members.push(human.peer_id.clone());
    }

    for _ in 0..ai_needed {
        let bot = Participant {
            participant_id: Uuid::new_v4().to_string(),
            session_id: session_id.clone(),
            peer_id: format!("ai-{}", Uuid::new_v4()),
            name: "AI Student".to_string(),
            role: ParticipantRole::Ai,
            room_id: Some(room_id.clone()),
        };
        ctx.store.insert_participant(&bot).await?;
        members.push(bot.peer_id);
    }

    let topic = GD_TOPICS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(GD_TOPICS[0])
        .to_string();
    tracing::info!(room = %room_id, topic = %topic, "generating room script");

    let script = scripts::generate_topic_script(&ctx.textgen, &topic, ctx.config.script_turns).await;

    let room = Room {
        room_id: room_id.clone(),
        session_id: session_id.clone(),
        participants: members.clone(),
        ai_count: ai_needed as i64,
        topic: topic.clone(),
        script,
        script_index: 0,
        user_talking: false,
    };
    ctx.store.insert_room(&room).await?;

    if ai_needed > 0 {
        let first_bot = &members[group.len()];
        ctx.store
            .insert_transcript(&TranscriptEntry {
                id: 0,
                session_id,
                room_id: room_id.clone(),
                speaker_id: first_bot.clone(),
                text: format!("Hello everyone! The topic is {topic}. "),
                timestamp: Utc::now(),
            })
            .await?;

        pacer::defer_turn(&ctx, &room_id, false);
    }

    Ok(room_id)
}
