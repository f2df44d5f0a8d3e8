//! Core domain entities: sessions, responses, votes, ratings, and the
//! events published as a session moves through its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type ModelId = String;
pub type UserId = String;

/// Opaque bearer credential already validated by the (out-of-scope)
/// authentication layer. The core never inspects `provider_credential`;
/// it is forwarded to the Provider Gateway verbatim.
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: UserId,
    pub provider_credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Standard,
    Debate,
    Tournament,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Responding,
    Voting,
    Synthesizing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.5.
    /// `Responding -> Responding` (debate round advance) is legal and
    /// stays in place, so it is accepted here too.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Responding)
                | (Responding, Responding)
                | (Responding, Voting)
                | (Voting, Synthesizing)
                | (Synthesizing, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub debate_rounds: u32,
    pub response_timeout_secs: u64,
    pub mystery_judge_enabled: bool,
    pub devils_advocate_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debate_rounds: 3,
            response_timeout_secs: 60,
            mystery_judge_enabled: false,
            devils_advocate_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub question: String,
    pub mode: SessionMode,
    pub category_id: Option<String>,
    pub participant_models: Vec<ModelId>,
    pub chairperson_model_id: Option<ModelId>,
    pub devils_advocate_model_id: Option<ModelId>,
    pub mystery_judge_model_id: Option<ModelId>,
    pub synthesis: Option<String>,
    pub minority_report: Option<String>,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Deterministic seed driving role assignment, anonymization, and
    /// tournament bracketing.
    pub rng_seed: u64,
    /// Stable `model_id -> anonymous label` assignment for this session
    ///.
    pub labels: BTreeMap<ModelId, String>,
}

impl Session {
    pub fn label_for(&self, model_id: &str) -> Option<&str> {
        self.labels.get(model_id).map(String::as_str)
    }

    pub fn model_for_label(&self, label: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(m, _)| m.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub session_id: SessionId,
    pub model_id: ModelId,
    pub round: u32,
    pub content: String,
    pub anonymous_label: String,
    pub response_time_ms: u64,
    pub token_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterType {
    Model,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub session_id: SessionId,
    pub voter_type: VoterType,
    pub voter_id: String,
    /// Best first; a duplicate-free permutation of a subset of the
    /// session's anonymous labels.
    pub ranked_responses: Vec<String>,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRating {
    pub model_id: ModelId,
    pub category_id: Option<String>,
    pub rating: i64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub updated_at: DateTime<Utc>,
}

impl ModelRating {
    pub fn games_played(&self) -> u64 {
        self.wins + self.losses + self.draws
    }

    pub fn fresh(model_id: ModelId, category_id: Option<String>, initial_rating: i64) -> Self {
        Self {
            model_id,
            category_id,
            rating: initial_rating,
            wins: 0,
            losses: 0,
            draws: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingChangeReason {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EloHistoryEntry {
    pub id: i64,
    pub model_id: ModelId,
    pub category_id: Option<String>,
    pub session_id: Option<SessionId>,
    pub old_rating: i64,
    pub new_rating: i64,
    pub change: i64,
    pub reason: RatingChangeReason,
    pub created_at: DateTime<Utc>,
}

/// Head-to-head counters over the ordered pair `(model_a, model_b)` with
/// `model_a < model_b` lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matchup {
    pub model_a: ModelId,
    pub model_b: ModelId,
    pub category_id: Option<String>,
    pub wins_a: u64,
    pub wins_b: u64,
    pub draws: u64,
}

/// Closed set of live-event kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    CouncilStarted {
        mode: SessionMode,
        models: Vec<ModelId>,
        labels: BTreeMap<ModelId, String>,
    },
    ModelResponding {
        model_id: ModelId,
        label: String,
    },
    ModelResponseChunk {
        label: String,
        content_delta: String,
        done: bool,
    },
    ModelComplete {
        label: String,
        response_time_ms: u64,
    },
    VotingStarted,
    VotingReceived {
        voter_id: String,
    },
    SynthesisStarted,
    SynthesisComplete {
        synthesis: String,
        minority_report: Option<String>,
    },
    CouncilCompleted,
    CouncilFailed {
        reason: String,
    },
    CouncilCancelled,
    TournamentChampion {
        winner_label: String,
        winner_model_id: ModelId,
    },
}

/// The envelope published on a session's topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub payload: EventPayload,
}
