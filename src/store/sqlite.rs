//! SQLite-backed `CouncilStore`.
//!
//! A single `rusqlite::Connection` behind a `parking_lot::Mutex`, opened
//! with WAL journaling and `SQLITE_OPEN_NO_MUTEX` (the crate does its own
//! locking), schema applied as one `execute_batch` of a constant string,
//! and prepared statements cached per-connection via `prepare_cached`.

use crate::error::{AppError, AppResult};
use crate::models::{
    EloHistoryEntry, Matchup, ModelRating, RatingChangeReason, Response, Session, SessionConfig,
    SessionId, SessionMode, SessionStatus, Vote, VoterType,
};
use crate::store::{CouncilStore, RatingUpdate};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    question TEXT NOT NULL,
    mode TEXT NOT NULL,
    category_id TEXT,
    participant_models_json TEXT NOT NULL,
    chairperson_model_id TEXT,
    devils_advocate_model_id TEXT,
    mystery_judge_model_id TEXT,
    synthesis TEXT,
    minority_report TEXT,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    failure_reason TEXT,
    rng_seed INTEGER NOT NULL,
    labels_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    model_id TEXT NOT NULL,
    round INTEGER NOT NULL,
    content TEXT NOT NULL,
    anonymous_label TEXT NOT NULL,
    response_time_ms INTEGER NOT NULL,
    token_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_responses_session_round
    ON responses(session_id, round);

CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    voter_type TEXT NOT NULL,
    voter_id TEXT NOT NULL,
    ranked_responses_json TEXT NOT NULL,
    weight REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_votes_session ON votes(session_id);

CREATE TABLE IF NOT EXISTS model_ratings (
    model_id TEXT NOT NULL,
    category_id TEXT NOT NULL DEFAULT '',
    rating INTEGER NOT NULL,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    draws INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (model_id, category_id)
);

CREATE TABLE IF NOT EXISTS elo_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id TEXT NOT NULL,
    category_id TEXT NOT NULL DEFAULT '',
    session_id TEXT,
    old_rating INTEGER NOT NULL,
    new_rating INTEGER NOT NULL,
    change INTEGER NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_elo_history_model
    ON elo_history(model_id, category_id, created_at DESC);

CREATE TABLE IF NOT EXISTS matchups (
    model_a TEXT NOT NULL,
    model_b TEXT NOT NULL,
    category_id TEXT NOT NULL DEFAULT '',
    wins_a INTEGER NOT NULL DEFAULT 0,
    wins_b INTEGER NOT NULL DEFAULT 0,
    draws INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (model_a, model_b, category_id)
);
"#;

/// Empty string stands in for `category_id IS NULL` so the `(model_id,
/// category_id)` pair can serve as a SQLite primary key without nullable
/// key columns.
fn cat_key(category_id: Option<&str>) -> &str {
    category_id.unwrap_or("")
}

fn cat_opt(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

pub struct SqliteCouncilStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCouncilStore {
    pub fn new(db_path: &str) -> AppResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| AppError::Other(anyhow::anyhow!("failed to open {}: {}", db_path, e)))?;

        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(journal_mode, "WAL mode not active");
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap_or(0);
        info!(existing_sessions = count, path = db_path, "council store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let id: String = row.get("id")?;
        let mode: String = row.get("mode")?;
        let status: String = row.get("status")?;
        let participant_models_json: String = row.get("participant_models_json")?;
        let config_json: String = row.get("config_json")?;
        let labels_json: String = row.get("labels_json")?;
        let created_at: String = row.get("created_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        Ok(Session {
            id: id.parse().unwrap_or_default(),
            user_id: row.get("user_id")?,
            question: row.get("question")?,
            mode: parse_mode(&mode),
            category_id: row.get("category_id")?,
            participant_models: serde_json::from_str(&participant_models_json)
                .unwrap_or_default(),
            chairperson_model_id: row.get("chairperson_model_id")?,
            devils_advocate_model_id: row.get("devils_advocate_model_id")?,
            mystery_judge_model_id: row.get("mystery_judge_model_id")?,
            synthesis: row.get("synthesis")?,
            minority_report: row.get("minority_report")?,
            config: serde_json::from_str(&config_json).unwrap_or_else(|_| SessionConfig::default()),
            status: parse_status(&status),
            created_at: parse_dt(&created_at),
            completed_at: completed_at.as_deref().map(parse_dt),
            failure_reason: row.get("failure_reason")?,
            rng_seed: row.get::<_, i64>("rng_seed")? as u64,
            labels: serde_json::from_str::<BTreeMap<String, String>>(&labels_json)
                .unwrap_or_default(),
        })
    }
}

fn parse_mode(s: &str) -> SessionMode {
    match s {
        "debate" => SessionMode::Debate,
        "tournament" => SessionMode::Tournament,
        _ => SessionMode::Standard,
    }
}

fn mode_str(m: SessionMode) -> &'static str {
    match m {
        SessionMode::Standard => "standard",
        SessionMode::Debate => "debate",
        SessionMode::Tournament => "tournament",
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "responding" => SessionStatus::Responding,
        "voting" => SessionStatus::Voting,
        "synthesizing" => SessionStatus::Synthesizing,
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "cancelled" => SessionStatus::Cancelled,
        _ => SessionStatus::Pending,
    }
}

fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Pending => "pending",
        SessionStatus::Responding => "responding",
        SessionStatus::Voting => "voting",
        SessionStatus::Synthesizing => "synthesizing",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Cancelled => "cancelled",
    }
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

fn voter_type_str(v: VoterType) -> &'static str {
    match v {
        VoterType::Model => "model",
        VoterType::User => "user",
    }
}

fn parse_voter_type(s: &str) -> VoterType {
    match s {
        "user" => VoterType::User,
        _ => VoterType::Model,
    }
}

fn reason_str(r: RatingChangeReason) -> &'static str {
    match r {
        RatingChangeReason::Win => "win",
        RatingChangeReason::Loss => "loss",
        RatingChangeReason::Draw => "draw",
    }
}

fn parse_reason(s: &str) -> RatingChangeReason {
    match s {
        "win" => RatingChangeReason::Win,
        "loss" => RatingChangeReason::Loss,
        _ => RatingChangeReason::Draw,
    }
}

#[async_trait]
impl CouncilStore for SqliteCouncilStore {
    async fn create_session(&self, session: &Session) -> AppResult<()> {
        let participant_models_json = serde_json::to_string(&session.participant_models)?
            .to_owned();
        let config_json = serde_json::to_string(&session.config)?;
        let labels_json = serde_json::to_string(&session.labels)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (
                id, user_id, question, mode, category_id, participant_models_json,
                chairperson_model_id, devils_advocate_model_id, mystery_judge_model_id,
                synthesis, minority_report, config_json, status, created_at,
                completed_at, failure_reason, rng_seed, labels_json
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                session.id.to_string(),
                session.user_id,
                session.question,
                mode_str(session.mode),
                session.category_id,
                participant_models_json,
                session.chairperson_model_id,
                session.devils_advocate_model_id,
                session.mystery_judge_model_id,
                session.synthesis,
                session.minority_report,
                config_json,
                status_str(session.status),
                session.created_at.to_rfc3339(),
                session.completed_at.map(|d| d.to_rfc3339()),
                session.failure_reason,
                session.rng_seed as i64,
                labels_json,
            ],
        )?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> AppResult<Session> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM sessions WHERE id = ?1")?;
        stmt.query_row(params![id.to_string()], Self::row_to_session)
            .map_err(|_| AppError::not_found(format!("session {id} not found")))
    }

    async fn update_status(
        &self,
        id: SessionId,
        status: SessionStatus,
        failure_reason: Option<&str>,
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        let completed_at = if status.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        conn.execute(
            "UPDATE sessions SET status = ?1, failure_reason = COALESCE(?2, failure_reason),
             completed_at = COALESCE(?3, completed_at) WHERE id = ?4",
            params![status_str(status), failure_reason, completed_at, id.to_string()],
        )?;
        Ok(())
    }

    async fn set_roles_and_labels(
        &self,
        id: SessionId,
        chairperson_model_id: Option<&str>,
        devils_advocate_model_id: Option<&str>,
        mystery_judge_model_id: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> AppResult<()> {
        let labels_json = serde_json::to_string(labels)?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET chairperson_model_id = ?1, devils_advocate_model_id = ?2,
             mystery_judge_model_id = ?3, labels_json = ?4 WHERE id = ?5",
            params![
                chairperson_model_id,
                devils_advocate_model_id,
                mystery_judge_model_id,
                labels_json,
                id.to_string(),
            ],
        )?;
        Ok(())
    }

    async fn append_response(&self, response: &Response) -> AppResult<Response> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO responses (
                session_id, model_id, round, content, anonymous_label,
                response_time_ms, token_count, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                response.session_id.to_string(),
                response.model_id,
                response.round,
                response.content,
                response.anonymous_label,
                response.response_time_ms as i64,
                response.token_count as i64,
                response.created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Response {
            id,
            ..response.clone()
        })
    }

    async fn list_responses(&self, session_id: SessionId, round: u32) -> AppResult<Vec<Response>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, session_id, model_id, round, content, anonymous_label,
                    response_time_ms, token_count, created_at
             FROM responses WHERE session_id = ?1 AND round = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string(), round], |row| {
            let sid: String = row.get(1)?;
            let created_at: String = row.get(8)?;
            Ok(Response {
                id: row.get(0)?,
                session_id: sid.parse().unwrap_or_default(),
                model_id: row.get(2)?,
                round: row.get(3)?,
                content: row.get(4)?,
                anonymous_label: row.get(5)?,
                response_time_ms: row.get::<_, i64>(6)? as u64,
                token_count: row.get::<_, i64>(7)? as u64,
                created_at: parse_dt(&created_at),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn append_vote(&self, vote: &Vote) -> AppResult<Vote> {
        let ranked_json = serde_json::to_string(&vote.ranked_responses)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO votes (
                session_id, voter_type, voter_id, ranked_responses_json,
                weight, created_at
            ) VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                vote.session_id.to_string(),
                voter_type_str(vote.voter_type),
                vote.voter_id,
                ranked_json,
                vote.weight,
                vote.created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Vote {
            id,
            ..vote.clone()
        })
    }

    async fn list_votes(&self, session_id: SessionId) -> AppResult<Vec<Vote>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, session_id, voter_type, voter_id, ranked_responses_json, weight, created_at
             FROM votes WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            let sid: String = row.get(1)?;
            let voter_type: String = row.get(2)?;
            let ranked_json: String = row.get(4)?;
            let created_at: String = row.get(6)?;
            Ok(Vote {
                id: row.get(0)?,
                session_id: sid.parse().unwrap_or_default(),
                voter_type: parse_voter_type(&voter_type),
                voter_id: row.get(3)?,
                ranked_responses: serde_json::from_str(&ranked_json).unwrap_or_default(),
                weight: row.get(5)?,
                created_at: parse_dt(&created_at),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn set_synthesis(
        &self,
        id: SessionId,
        synthesis: &str,
        minority_report: Option<&str>,
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET synthesis = ?1, minority_report = ?2 WHERE id = ?3",
            params![synthesis, minority_report, id.to_string()],
        )?;
        Ok(())
    }

    async fn get_or_init_rating(
        &self,
        model_id: &str,
        category_id: Option<&str>,
        initial_rating: i64,
    ) -> AppResult<ModelRating> {
        let conn = self.conn.lock();
        let key = cat_key(category_id);
        let found = conn.query_row(
            "SELECT rating, wins, losses, draws, updated_at FROM model_ratings
             WHERE model_id = ?1 AND category_id = ?2",
            params![model_id, key],
            |row| {
                let updated_at: String = row.get(4)?;
                Ok(ModelRating {
                    model_id: model_id.to_string(),
                    category_id: cat_opt(key),
                    rating: row.get(0)?,
                    wins: row.get::<_, i64>(1)? as u64,
                    losses: row.get::<_, i64>(2)? as u64,
                    draws: row.get::<_, i64>(3)? as u64,
                    updated_at: parse_dt(&updated_at),
                })
            },
        );

        match found {
            Ok(rating) => Ok(rating),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let fresh =
                    ModelRating::fresh(model_id.to_string(), cat_opt(key), initial_rating);
                conn.execute(
                    "INSERT INTO model_ratings (model_id, category_id, rating, wins, losses, draws, updated_at)
                     VALUES (?1,?2,?3,0,0,0,?4)",
                    params![model_id, key, initial_rating, fresh.updated_at.to_rfc3339()],
                )?;
                Ok(fresh)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_rating_updates(
        &self,
        session_id: SessionId,
        updates: &[RatingUpdate],
        matchups: &[Matchup],
    ) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> AppResult<()> {
            for update in updates {
                let key = cat_key(update.category_id.as_deref());
                let (win_delta, loss_delta, draw_delta) = match update.reason {
                    RatingChangeReason::Win => (1, 0, 0),
                    RatingChangeReason::Loss => (0, 1, 0),
                    RatingChangeReason::Draw => (0, 0, 1),
                };
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "UPDATE model_ratings SET rating = ?1, wins = wins + ?2, losses = losses + ?3,
                     draws = draws + ?4, updated_at = ?5 WHERE model_id = ?6 AND category_id = ?7",
                    params![
                        update.new_rating,
                        win_delta,
                        loss_delta,
                        draw_delta,
                        now,
                        update.model_id,
                        key,
                    ],
                )?;
                conn.execute(
                    "INSERT INTO elo_history (
                        model_id, category_id, session_id, old_rating, new_rating, change, reason, created_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    params![
                        update.model_id,
                        key,
                        session_id.to_string(),
                        update.old_rating,
                        update.new_rating,
                        update.new_rating - update.old_rating,
                        reason_str(update.reason),
                        now,
                    ],
                )?;
            }

            for m in matchups {
                let key = cat_key(m.category_id.as_deref());
                conn.execute(
                    "INSERT INTO matchups (model_a, model_b, category_id, wins_a, wins_b, draws)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(model_a, model_b, category_id) DO UPDATE SET
                        wins_a = wins_a + excluded.wins_a,
                        wins_b = wins_b + excluded.wins_b,
                        draws = draws + excluded.draws",
                    params![m.model_a, m.model_b, key, m.wins_a, m.wins_b, m.draws],
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                Err(e)
            }
        }
    }

    async fn rating_history(
        &self,
        model_id: &str,
        category_id: Option<&str>,
    ) -> AppResult<Vec<EloHistoryEntry>> {
        let conn = self.conn.lock();
        let key = cat_key(category_id);
        let mut stmt = conn.prepare_cached(
            "SELECT id, model_id, category_id, session_id, old_rating, new_rating, change, reason, created_at
             FROM elo_history WHERE model_id = ?1 AND category_id = ?2 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![model_id, key], |row| {
            let category_id: String = row.get(2)?;
            let session_id: Option<String> = row.get(3)?;
            let reason: String = row.get(7)?;
            let created_at: String = row.get(8)?;
            Ok(EloHistoryEntry {
                id: row.get(0)?,
                model_id: row.get(1)?,
                category_id: cat_opt(&category_id),
                session_id: session_id.and_then(|s| s.parse().ok()),
                old_rating: row.get(4)?,
                new_rating: row.get(5)?,
                change: row.get(6)?,
                reason: parse_reason(&reason),
                created_at: parse_dt(&created_at),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionConfig;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn temp_store() -> (SqliteCouncilStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("council.db");
        let store = SqliteCouncilStore::new(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn sample_session() -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            question: "What is the meaning of life?".into(),
            mode: SessionMode::Standard,
            category_id: None,
            participant_models: vec!["gpt".into(), "claude".into()],
            chairperson_model_id: None,
            devils_advocate_model_id: None,
            mystery_judge_model_id: None,
            synthesis: None,
            minority_report: None,
            config: SessionConfig::default(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            rng_seed: 42,
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_session() {
        let (store, _dir) = temp_store();
        let session = sample_session();
        store.create_session(&session).await.unwrap();

        let fetched = store.get_session(session.id).await.unwrap();
        assert_eq!(fetched.question, session.question);
        assert_eq!(fetched.participant_models, session.participant_models);
        assert_eq!(fetched.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn status_updates_stamp_completion_on_terminal_states() {
        let (store, _dir) = temp_store();
        let session = sample_session();
        store.create_session(&session).await.unwrap();

        store
            .update_status(session.id, SessionStatus::Completed, None)
            .await
            .unwrap();
        let fetched = store.get_session(session.id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn rating_updates_replace_not_accumulate() {
        let (store, _dir) = temp_store();
        let rating = store.get_or_init_rating("gpt", None, 1500).await.unwrap();
        assert_eq!(rating.rating, 1500);

        let session_id = Uuid::new_v4();
        store
            .apply_rating_updates(
                session_id,
                &[RatingUpdate {
                    model_id: "gpt".into(),
                    category_id: None,
                    old_rating: 1500,
                    new_rating: 1512,
                    reason: RatingChangeReason::Win,
                }],
                &[],
            )
            .await
            .unwrap();

        let updated = store.get_or_init_rating("gpt", None, 1500).await.unwrap();
        assert_eq!(updated.rating, 1512);
        assert_eq!(updated.wins, 1);

        let history = store.rating_history("gpt", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change, 12);
    }
}
