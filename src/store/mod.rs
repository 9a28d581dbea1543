//! Store adapter — typed access to the five scheduler collections.
//!
//! Thin by design: insert / find / count / conditional update only, no
//! business logic. Nested arrays (room members, scripts, score maps) are
//! stored as JSON text; timestamps are RFC-3339 TEXT with fixed precision
//! so `ORDER BY timestamp` is chronological. Conditional updates report
//! whether they applied via `rows_affected`, which is what the lifecycle
//! and pacer components key their race avoidance on.

pub mod models;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use models::*;

type Result<T> = std::result::Result<T, sqlx::Error>;

/// Handle to the scheduler database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the configured database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query
    /// on the same `:memory:` instance.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                start_time TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS participants (
                session_id     TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                peer_id        TEXT NOT NULL,
                name           TEXT NOT NULL,
                role           TEXT NOT NULL,
                room_id        TEXT,
                PRIMARY KEY (session_id, participant_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                room_id      TEXT PRIMARY KEY,
                session_id   TEXT NOT NULL,
                participants TEXT NOT NULL,
                ai_count     INTEGER NOT NULL,
                topic        TEXT NOT NULL,
                script       TEXT NOT NULL,
                script_index INTEGER NOT NULL DEFAULT 0,
                user_talking INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transcripts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                room_id    TEXT NOT NULL,
                speaker_id TEXT NOT NULL,
                text       TEXT NOT NULL,
                timestamp  TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS gd_results (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                student_email TEXT NOT NULL,
                session_id    TEXT NOT NULL,
                scores        TEXT NOT NULL,
                feedback      TEXT NOT NULL,
                strengths     TEXT NOT NULL,
                improvements  TEXT NOT NULL,
                created_at    TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transcripts_room
             ON transcripts (session_id, room_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Sessions ─────────────────────────────────────────────

    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query("INSERT INTO sessions (session_id, status, start_time) VALUES (?1, ?2, ?3)")
            .bind(&session.session_id)
            .bind(session.status.as_str())
            .bind(fmt_ts(session.start_time))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT session_id, status, start_time FROM sessions WHERE session_id = ?1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(session_from_row))
    }

    pub async fn waiting_sessions(&self) -> Result<Vec<Session>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT session_id, status, start_time FROM sessions WHERE status = 'waiting'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(session_from_row).collect())
    }

    /// Flip a session to active only if it is still waiting. Returns whether
    /// the update applied — the sole guard against double allocation.
    pub async fn activate_if_waiting(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'active' WHERE session_id = ?1 AND status = 'waiting'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Participants ─────────────────────────────────────────

    pub async fn insert_participant(&self, p: &Participant) -> Result<()> {
        sqlx::query(
            "INSERT INTO participants (session_id, participant_id, peer_id, name, role, room_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&p.session_id)
        .bind(&p.participant_id)
        .bind(&p.peer_id)
        .bind(&p.name)
        .bind(p.role.as_str())
        .bind(p.room_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_participant(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Option<Participant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT session_id, participant_id, peer_id, name, role, room_id
             FROM participants WHERE session_id = ?1 AND participant_id = ?2",
        )
        .bind(session_id)
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(participant_from_row))
    }

    pub async fn find_participant_by_peer(
        &self,
        session_id: &str,
        peer_id: &str,
    ) -> Result<Option<Participant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            "SELECT session_id, participant_id, peer_id, name, role, room_id
             FROM participants WHERE session_id = ?1 AND peer_id = ?2",
        )
        .bind(session_id)
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(participant_from_row))
    }

    pub async fn count_participants(&self, session_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM participants WHERE session_id = ?1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Humans still waiting for a room, in insertion order.
    pub async fn unassigned_humans(&self, session_id: &str) -> Result<Vec<Participant>> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            "SELECT session_id, participant_id, peer_id, name, role, room_id
             FROM participants
             WHERE session_id = ?1 AND role = 'human' AND room_id IS NULL
             ORDER BY rowid",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(participant_from_row).collect())
    }

    /// Assign a room to a participant that has none yet. Returns whether the
    /// update applied; an already-assigned participant is left untouched.
    pub async fn assign_room(
        &self,
        session_id: &str,
        participant_id: &str,
        room_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE participants SET room_id = ?3
             WHERE session_id = ?1 AND participant_id = ?2 AND room_id IS NULL",
        )
        .bind(session_id)
        .bind(participant_id)
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn simulated_members(&self, room_id: &str) -> Result<Vec<Participant>> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            "SELECT session_id, participant_id, peer_id, name, role, room_id
             FROM participants WHERE room_id = ?1 AND role = 'ai' ORDER BY rowid",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(participant_from_row).collect())
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn insert_room(&self, room: &Room) -> Result<()> {
        sqlx::query(
            "INSERT INTO rooms
                 (room_id, session_id, participants, ai_count, topic, script, script_index, user_talking)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&room.room_id)
        .bind(&room.session_id)
        .bind(to_json(&room.participants))
        .bind(room.ai_count)
        .bind(&room.topic)
        .bind(to_json(&room.script))
        .bind(room.script_index)
        .bind(room.user_talking as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(
            "SELECT room_id, session_id, participants, ai_count, topic, script, script_index, user_talking
             FROM rooms WHERE room_id = ?1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(room_from_row))
    }

    /// Unconditional overwrite of the live barge-in flag.
    pub async fn set_user_talking(&self, room_id: &str, talking: bool) -> Result<()> {
        sqlx::query("UPDATE rooms SET user_talking = ?2 WHERE room_id = ?1")
            .bind(room_id)
            .bind(talking as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Advance the script cursor by one, but only from the expected value.
    /// Returns whether the increment applied.
    pub async fn advance_script_index(&self, room_id: &str, from_index: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE rooms SET script_index = script_index + 1
             WHERE room_id = ?1 AND script_index = ?2",
        )
        .bind(room_id)
        .bind(from_index)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Transcripts ──────────────────────────────────────────

    pub async fn insert_transcript(&self, entry: &TranscriptEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO transcripts (session_id, room_id, speaker_id, text, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&entry.session_id)
        .bind(&entry.room_id)
        .bind(&entry.speaker_id)
        .bind(&entry.text)
        .bind(fmt_ts(entry.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All entries for a session, optionally narrowed to one room,
    /// oldest first.
    pub async fn transcripts_for(
        &self,
        session_id: &str,
        room_id: Option<&str>,
    ) -> Result<Vec<TranscriptEntry>> {
        let rows: Vec<(i64, String, String, String, String, String)> = match room_id {
            Some(room) => {
                sqlx::query_as(
                    "SELECT id, session_id, room_id, speaker_id, text, timestamp
                     FROM transcripts WHERE session_id = ?1 AND room_id = ?2
                     ORDER BY timestamp ASC, id ASC",
                )
                .bind(session_id)
                .bind(room)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, session_id, room_id, speaker_id, text, timestamp
                     FROM transcripts WHERE session_id = ?1
                     ORDER BY timestamp ASC, id ASC",
                )
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(id, session_id, room_id, speaker_id, text, ts)| TranscriptEntry {
                id,
                session_id,
                room_id,
                speaker_id,
                text,
                timestamp: parse_ts(&ts),
            })
            .collect())
    }

    // ── Evaluation results ───────────────────────────────────

    pub async fn insert_result(&self, result: &GdResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO gd_results
                 (student_email, session_id, scores, feedback, strengths, improvements, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&result.student_email)
        .bind(&result.session_id)
        .bind(to_json(&result.scores))
        .bind(&result.feedback)
        .bind(to_json(&result.strengths))
        .bind(to_json(&result.improvements))
        .bind(fmt_ts(result.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_results(&self, session_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM gd_results WHERE session_id = ?1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

type ParticipantRow = (String, String, String, String, String, Option<String>);
type RoomRow = (String, String, String, i64, String, String, i64, i64);

fn session_from_row((session_id, status, start_time): (String, String, String)) -> Session {
    Session {
        session_id,
        status: SessionStatus::parse(&status),
        start_time: parse_ts(&start_time),
    }
}

fn participant_from_row(
    (session_id, participant_id, peer_id, name, role, room_id): ParticipantRow,
) -> Participant {
    Participant {
        participant_id,
        session_id,
        peer_id,
        name,
        role: ParticipantRole::parse(&role),
        room_id,
    }
}

fn room_from_row(
    (room_id, session_id, participants, ai_count, topic, script, script_index, user_talking): RoomRow,
) -> Room {
    Room {
        room_id,
        session_id,
        participants: from_json(&participants),
        ai_count,
        topic,
        script: from_json(&script),
        script_index,
        user_talking: user_talking != 0,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!("failed to serialize stored JSON blob: {}", e);
        "[]".to_string()
    })
}

fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw)
        .inspect_err(|e| tracing::warn!("bad stored JSON blob: {}", e))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn test_store() -> Store {
        let store = Store::connect_in_memory().await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    fn human(session: &str, id: &str) -> Participant {
        Participant {
            participant_id: id.to_string(),
            session_id: session.to_string(),
            peer_id: format!("peer-{id}"),
            name: format!("Student {id}"),
            role: ParticipantRole::Human,
            room_id: None,
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = test_store().await;
        store.migrate().await.expect("second migrate");
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reconnect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("gd.db").display());

        let store = Store::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        store
            .insert_session(&Session {
                session_id: "s-1".to_string(),
                status: SessionStatus::Waiting,
                start_time: Utc::now(),
            })
            .await
            .expect("insert");
        drop(store);

        let reopened = Store::connect(&url).await.expect("reconnect");
        reopened.migrate().await.expect("migrate again");
        let loaded = reopened.get_session("s-1").await.expect("get").expect("some");
        assert_eq!(loaded.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let store = test_store().await;
        let session = Session {
            session_id: "s-1".to_string(),
            status: SessionStatus::Waiting,
            start_time: Utc::now() + chrono::Duration::minutes(5),
        };
        store.insert_session(&session).await.expect("insert");

        let loaded = store.get_session("s-1").await.expect("get").expect("some");
        assert_eq!(loaded.status, SessionStatus::Waiting);
        assert_eq!(
            loaded.start_time.timestamp_millis(),
            session.start_time.timestamp_millis()
        );
        assert!(store.get_session("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_activate_applies_exactly_once() {
        let store = test_store().await;
        store
            .insert_session(&Session {
                session_id: "s-1".to_string(),
                status: SessionStatus::Waiting,
                start_time: Utc::now(),
            })
            .await
            .expect("insert");

        assert!(store.activate_if_waiting("s-1").await.expect("first"));
        assert!(!store.activate_if_waiting("s-1").await.expect("second"));
        let loaded = store.get_session("s-1").await.expect("get").expect("some");
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_room_assignment_is_one_shot() {
        let store = test_store().await;
        store.insert_participant(&human("s-1", "p-1")).await.expect("insert");

        assert!(store.assign_room("s-1", "p-1", "room-a").await.expect("assign"));
        assert!(!store.assign_room("s-1", "p-1", "room-b").await.expect("reassign"));

        let p = store
            .get_participant("s-1", "p-1")
            .await
            .expect("get")
            .expect("some");
        assert_eq!(p.room_id.as_deref(), Some("room-a"));
    }

    #[tokio::test]
    async fn test_unassigned_humans_excludes_ai_and_assigned() {
        let store = test_store().await;
        store.insert_participant(&human("s-1", "p-1")).await.expect("insert");
        store.insert_participant(&human("s-1", "p-2")).await.expect("insert");
        store
            .insert_participant(&Participant {
                participant_id: "bot-1".to_string(),
                session_id: "s-1".to_string(),
                peer_id: "ai-xyz".to_string(),
                name: "AI Student".to_string(),
                role: ParticipantRole::Ai,
                room_id: Some("room-a".to_string()),
            })
            .await
            .expect("insert");
        store.assign_room("s-1", "p-2", "room-a").await.expect("assign");

        let waiting = store.unassigned_humans("s-1").await.expect("query");
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].participant_id, "p-1");
    }

    #[tokio::test]
    async fn test_cursor_advances_only_from_expected_value() {
        let store = test_store().await;
        let room = Room {
            room_id: "room-a".to_string(),
            session_id: "s-1".to_string(),
            participants: vec!["peer-1".to_string(), "ai-1".to_string()],
            ai_count: 1,
            topic: "Remote work".to_string(),
            script: vec![ScriptTurn {
                sentiment: "For".to_string(),
                text: "Opening point".to_string(),
            }],
            script_index: 0,
            user_talking: false,
        };
        store.insert_room(&room).await.expect("insert");

        assert!(store.advance_script_index("room-a", 0).await.expect("advance"));
        // Stale expected value — another path already produced this turn.
        assert!(!store.advance_script_index("room-a", 0).await.expect("stale"));

        let loaded = store.get_room("room-a").await.expect("get").expect("some");
        assert_eq!(loaded.script_index, 1);
        assert_eq!(loaded.script.len(), 1);
        assert_eq!(loaded.participants.len(), 2);
    }

    #[tokio::test]
    async fn test_transcripts_ordered_by_timestamp() {
        let store = test_store().await;
        let base = Utc::now();
        for (offset_ms, text) in [(200, "second"), (0, "first"), (400, "third")] {
            store
                .insert_transcript(&TranscriptEntry {
                    id: 0,
                    session_id: "s-1".to_string(),
                    room_id: "room-a".to_string(),
                    speaker_id: "peer-1".to_string(),
                    text: text.to_string(),
                    timestamp: base + chrono::Duration::milliseconds(offset_ms),
                })
                .await
                .expect("insert");
        }

        let entries = store
            .transcripts_for("s-1", Some("room-a"))
            .await
            .expect("query");
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }
}
