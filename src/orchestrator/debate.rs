//! Debate mode: several responding rounds feeding back into each other
//! before a single vote and synthesis.

use super::standard::{collect_votes, synthesize_and_rate};
use super::{CancelToken, Orchestrator};
use crate::error::{AppError, AppResult};
use crate::models::{Credential, EventPayload, Response, Session, SessionStatus};
use crate::provider::ProviderGateway;
use std::sync::Arc;

pub async fn run_debate(
    orchestrator: &Orchestrator,
    session: &mut Session,
    credential: &Credential,
    gateway: Arc<dyn ProviderGateway>,
    cancel: CancelToken,
) -> AppResult<()> {
    let responding_models = orchestrator.prepare_roles_and_labels(session).await?;

    orchestrator
        .events
        .publish(
            session.id,
            EventPayload::CouncilStarted {
                mode: session.mode,
                models: session.participant_models.clone(),
                labels: session.labels.clone(),
            },
        )
        .await;

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Responding, None)
        .await?;

    let rounds = session.config.debate_rounds.max(1);
    let mut all_rounds: Vec<Vec<Response>> = Vec::new();
    let mut last_round: Vec<Response> = Vec::new();

    for round in 0..rounds {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let prompt_for = build_round_prompt(session, &all_rounds);
        let responses = orchestrator
            .race_responses(
                session,
                round,
                &responding_models,
                credential,
                gateway.clone(),
                prompt_for,
                cancel.clone(),
            )
            .await?;

        if round + 1 < rounds {
            orchestrator
                .store
                .update_status(session.id, SessionStatus::Responding, None)
                .await?;
        }
        all_rounds.push(responses.clone());
        last_round = responses;
    }

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Voting, None)
        .await?;
    orchestrator.events.publish(session.id, EventPayload::VotingStarted).await;

    let votes = collect_votes(orchestrator, session, &last_round, credential, gateway.clone()).await?;

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Synthesizing, None)
        .await?;
    orchestrator.events.publish(session.id, EventPayload::SynthesisStarted).await;

    synthesize_and_rate(orchestrator, session, &responding_models, &votes, credential, gateway).await?;

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Completed, None)
        .await?;
    orchestrator.events.publish(session.id, EventPayload::CouncilCompleted).await;

    Ok(())
}

/// Round 0 gets the bare question; every later round also sees every
/// earlier round's anonymized responses (its own and others'), not just
/// the one immediately before it, so a rebuttal in round 5 can still
/// reference a position staked out in round 1.
fn build_round_prompt(session: &Session, prior_rounds: &[Vec<Response>]) -> impl Fn(&str) -> String {
    let question = session.question.clone();
    let transcript: String = prior_rounds
        .iter()
        .enumerate()
        .map(|(round_index, responses)| {
            let body: String = responses
                .iter()
                .map(|r| format!("[{}]: {}\n\n", r.anonymous_label, r.content))
                .collect();
            format!("Round {}:\n\n{body}", round_index + 1)
        })
        .collect();

    move |_model_id: &str| {
        if transcript.is_empty() {
            question.clone()
        } else {
            format!(
                "Question: {question}\n\nPrior rounds' anonymized responses:\n\n{transcript}\
                 Revise or defend your position in light of the above."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionConfig, SessionId, SessionMode, SessionStatus};
    use std::collections::BTreeMap;

    fn session() -> Session {
        Session {
            id: SessionId::new_v4(),
            user_id: "u1".to_string(),
            question: "What is the best approach?".to_string(),
            mode: SessionMode::Debate,
            category_id: None,
            participant_models: vec!["m1".to_string(), "m2".to_string()],
            chairperson_model_id: None,
            devils_advocate_model_id: None,
            mystery_judge_model_id: None,
            synthesis: None,
            minority_report: None,
            config: SessionConfig::default(),
            status: SessionStatus::Pending,
            created_at: chrono::Utc::now(),
            completed_at: None,
            failure_reason: None,
            rng_seed: 1,
            labels: BTreeMap::new(),
        }
    }

    fn response(label: &str, content: &str) -> Response {
        Response {
            id: 0,
            session_id: SessionId::nil(),
            model_id: label.to_string(),
            round: 0,
            content: content.to_string(),
            anonymous_label: label.to_string(),
            response_time_ms: 0,
            token_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn round_zero_gets_the_bare_question() {
        let prompt_for = build_round_prompt(&session(), &[]);
        assert_eq!(prompt_for("m1"), "What is the best approach?");
    }

    #[test]
    fn a_later_round_carries_forward_every_earlier_round_not_just_the_last_one() {
        let rounds = vec![
            vec![response("A", "round one take")],
            vec![response("A", "round two take")],
        ];
        let prompt_for = build_round_prompt(&session(), &rounds);
        let prompt = prompt_for("m1");
        assert!(prompt.contains("round one take"), "round 1 content must survive into round 3's prompt");
        assert!(prompt.contains("round two take"), "round 2 content must still be present");
    }
}
