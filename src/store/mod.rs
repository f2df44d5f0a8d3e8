//! Durable checkpoint storage for council sessions.
//!
//! The orchestrator never holds session state only in memory: every stage
//! transition, response, vote, and rating update is written through this
//! store before the next stage starts, so a process restart can resume (or
//! at minimum report) the last durable state of a session.

pub mod sqlite;

use crate::error::AppResult;
use crate::models::{
    EloHistoryEntry, Matchup, ModelId, ModelRating, RatingChangeReason, Response, Session,
    SessionId, SessionStatus, Vote,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// The absolute rating replacement computed by the rating engine for one
/// model in one session.
#[derive(Debug, Clone)]
pub struct RatingUpdate {
    pub model_id: String,
    pub category_id: Option<String>,
    pub old_rating: i64,
    pub new_rating: i64,
    pub reason: RatingChangeReason,
}

/// Everything the orchestrator needs durable, independent of backing engine.
#[async_trait]
pub trait CouncilStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> AppResult<()>;

    async fn get_session(&self, id: SessionId) -> AppResult<Session>;

    async fn update_status(
        &self,
        id: SessionId,
        status: SessionStatus,
        failure_reason: Option<&str>,
    ) -> AppResult<()>;

    /// Persists the once-per-session role assignment and anonymous-label
    /// mapping computed before the first responding round.
    async fn set_roles_and_labels(
        &self,
        id: SessionId,
        chairperson_model_id: Option<&str>,
        devils_advocate_model_id: Option<&str>,
        mystery_judge_model_id: Option<&str>,
        labels: &BTreeMap<ModelId, String>,
    ) -> AppResult<()>;

    async fn append_response(&self, response: &Response) -> AppResult<Response>;

    async fn list_responses(&self, session_id: SessionId, round: u32) -> AppResult<Vec<Response>>;

    async fn append_vote(&self, vote: &Vote) -> AppResult<Vote>;

    async fn list_votes(&self, session_id: SessionId) -> AppResult<Vec<Vote>>;

    async fn set_synthesis(
        &self,
        id: SessionId,
        synthesis: &str,
        minority_report: Option<&str>,
    ) -> AppResult<()>;

    /// Fetch the current rating for `(model_id, category_id)`, creating one
    /// at `initial_rating` if absent.
    async fn get_or_init_rating(
        &self,
        model_id: &str,
        category_id: Option<&str>,
        initial_rating: i64,
    ) -> AppResult<ModelRating>;

    /// Apply a batch of rating updates (one per participant) plus the
    /// matchup counters they imply, atomically.
    async fn apply_rating_updates(
        &self,
        session_id: SessionId,
        updates: &[RatingUpdate],
        matchups: &[Matchup],
    ) -> AppResult<()>;

    async fn rating_history(
        &self,
        model_id: &str,
        category_id: Option<&str>,
    ) -> AppResult<Vec<EloHistoryEntry>>;
}
