//! Request/response shapes for the session API.
//!
//! `SessionView` is a joined read-model, not a passthrough of `Session`:
//! it hides which model sits behind which anonymous label until the
//! session reaches a terminal state, so a client polling a live session
//! can't reverse-engineer authorship mid-deliberation.

use crate::error::{AppError, AppResult};
use crate::models::{ModelId, Session, SessionConfig, SessionMode, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub question: String,
    pub mode: SessionMode,
    pub participant_models: Vec<ModelId>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub chairperson_model_id: Option<ModelId>,
    #[serde(default)]
    pub debate_rounds: Option<u32>,
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
    #[serde(default)]
    pub mystery_judge_enabled: Option<bool>,
    #[serde(default)]
    pub devils_advocate_enabled: Option<bool>,
}

impl StartSessionRequest {
    /// Admission validation: question length, participant
    /// count bounds, no duplicate participants, and debate-round bounds
    /// when the caller overrides the default.
    pub fn validate(&self, config: &crate::config::Config) -> AppResult<()> {
        if self.question.trim().is_empty() {
            return Err(AppError::invalid("question must not be empty"));
        }
        if self.question.len() > config.max_question_len {
            return Err(AppError::invalid(format!(
                "question exceeds max length of {} bytes",
                config.max_question_len
            )));
        }
        if self.participant_models.len() < config.min_participants {
            return Err(AppError::invalid(format!(
                "at least {} participants are required",
                config.min_participants
            )));
        }
        if self.participant_models.len() > config.max_participants {
            return Err(AppError::invalid(format!(
                "at most {} participants are allowed",
                config.max_participants
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if !self.participant_models.iter().all(|m| seen.insert(m)) {
            return Err(AppError::invalid("participant_models must not contain duplicates"));
        }
        if let Some(chair) = &self.chairperson_model_id {
            if !self.participant_models.contains(chair) {
                return Err(AppError::invalid("chairperson_model_id must be a participant"));
            }
        }
        if let Some(rounds) = self.debate_rounds {
            if rounds < config.min_debate_rounds || rounds > config.max_debate_rounds {
                return Err(AppError::invalid(format!(
                    "debate_rounds must be between {} and {}",
                    config.min_debate_rounds, config.max_debate_rounds
                )));
            }
        }
        Ok(())
    }

    pub fn to_session_config(&self, config: &crate::config::Config) -> SessionConfig {
        SessionConfig {
            debate_rounds: self.debate_rounds.unwrap_or(config.default_debate_rounds),
            response_timeout_secs: self
                .response_timeout_secs
                .unwrap_or(config.default_response_timeout_secs),
            mystery_judge_enabled: self.mystery_judge_enabled.unwrap_or(false),
            devils_advocate_enabled: self.devils_advocate_enabled.unwrap_or(false),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub status: SessionStatus,
    pub mode: SessionMode,
    pub question: String,
    pub category_id: Option<String>,
    pub participant_count: usize,
    pub labels: Vec<String>,
    pub synthesis: Option<String>,
    pub minority_report: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Present only once the session is terminal.
    pub revealed_models: Option<BTreeMap<String, ModelId>>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        let revealed_models = session
            .completed_at
            .is_some()
            .then(|| session.labels.iter().map(|(m, l)| (l.clone(), m.clone())).collect());

        Self {
            id: session.id.to_string(),
            status: session.status,
            mode: session.mode,
            question: session.question,
            category_id: session.category_id,
            participant_count: session.participant_models.len(),
            labels: session.labels.into_values().collect(),
            synthesis: session.synthesis,
            minority_report: session.minority_report,
            failure_reason: session.failure_reason,
            created_at: session.created_at,
            completed_at: session.completed_at,
            revealed_models,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}
