//! Standard mode: one response round, one vote round, one synthesis
//!.

use super::{CancelToken, Orchestrator};
use crate::error::{AppError, AppResult};
use crate::models::{Credential, EventPayload, Session, SessionStatus, Vote, VoterType};
use crate::provider::ProviderGateway;
use crate::store::RatingUpdate;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub async fn run_standard(
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

    let question = session.question.clone();
    let responses = orchestrator
        .race_responses(
            session,
            0,
            &responding_models,
            credential,
            gateway.clone(),
            |_model_id| question.clone(),
            cancel.clone(),
        )
        .await?;

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Voting, None)
        .await?;
    orchestrator.events.publish(session.id, EventPayload::VotingStarted).await;

    let votes = collect_votes(orchestrator, session, &responses, credential, gateway.clone()).await?;

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

/// Every responding model plus the mystery judge (if any) casts a ballot
/// ranking the anonymized responses, excluding its own.
pub(crate) async fn collect_votes(
    orchestrator: &Orchestrator,
    session: &Session,
    responses: &[crate::models::Response],
    credential: &Credential,
    gateway: Arc<dyn ProviderGateway>,
) -> AppResult<Vec<Vote>> {
    let mut voters: Vec<(String, f64)> = responses
        .iter()
        .map(|r| (r.model_id.clone(), orchestrator.config.model_vote_weight))
        .collect();
    if let Some(judge) = &session.mystery_judge_model_id {
        voters.push((judge.clone(), orchestrator.config.mystery_judge_vote_weight));
    }

    let ballot_prompt = build_ballot_prompt(responses);
    let mut votes = Vec::new();

    for (voter_model_id, weight) in voters {
        let own_label = session.labels.get(&voter_model_id).cloned();
        let ballot = match gateway
            .request_vote(credential, &voter_model_id, &ballot_prompt)
            .await
        {
            Ok(ballot) => ballot,
            Err(e) => {
                warn!(model_id = %voter_model_id, error = %e, "voter dropped from ballot");
                continue;
            }
        };

        let ranked_responses: Vec<String> = ballot
            .into_iter()
            .filter(|label| Some(label) != own_label.as_ref())
            .collect();
        if ranked_responses.is_empty() {
            continue;
        }

        let vote = Vote {
            id: 0,
            session_id: session.id,
            voter_type: VoterType::Model,
            voter_id: voter_model_id,
            ranked_responses,
            weight,
            created_at: Utc::now(),
        };
        let stored = orchestrator.store.append_vote(&vote).await?;
        orchestrator
            .events
            .publish(
                session.id,
                EventPayload::VotingReceived { voter_id: stored.voter_id.clone() },
            )
            .await;
        votes.push(stored);
    }

    if votes.is_empty() {
        return Err(AppError::StageFailure("no ballots were cast".to_string()));
    }

    Ok(votes)
}

fn build_ballot_prompt(responses: &[crate::models::Response]) -> String {
    let mut prompt = String::from(
        "Rank the following anonymized responses from best to worst. \
         Return only the labels, best first.\n\n",
    );
    for response in responses {
        prompt.push_str(&format!("[{}]: {}\n\n", response.anonymous_label, response.content));
    }
    prompt
}

/// Runs the chairperson synthesis call, detects a minority report, and
/// folds the session's ballots into every participant's Elo rating
///.
pub(crate) async fn synthesize_and_rate(
    orchestrator: &Orchestrator,
    session: &mut Session,
    responding_models: &[crate::models::ModelId],
    votes: &[Vote],
    credential: &Credential,
    gateway: Arc<dyn ProviderGateway>,
) -> AppResult<()> {
    use crate::orchestrator::minority;
    use crate::rating::RatingEngine;

    let chairperson = session
        .chairperson_model_id
        .clone()
        .ok_or_else(|| AppError::StageFailure("no chairperson assigned".to_string()))?;

    let synthesis_prompt = build_synthesis_prompt(session, votes);
    let synthesis = gateway
        .request_synthesis(credential, &chairperson, &synthesis_prompt)
        .await
        .map_err(|e| AppError::StageFailure(format!("synthesis failed: {e}")))?;

    let borda = RatingEngine::borda_scores(votes);
    let consensus = minority::consensus_ranking(&borda);
    let threshold = minority::default_threshold(consensus.len());
    let divergence = minority::detect_minority_report(&consensus, votes, threshold);

    let minority_report = divergence.has_minority_report().then(|| {
        format!(
            "{} voter(s) diverged sharply from the consensus ranking {:?}: {:?}",
            divergence.diverging_voters.len(),
            divergence.consensus,
            divergence.diverging_voters,
        )
    });

    orchestrator
        .store
        .set_synthesis(session.id, &synthesis, minority_report.as_deref())
        .await?;
    session.synthesis = Some(synthesis);
    session.minority_report = minority_report;

    let mut current_ratings = BTreeMap::new();
    for model_id in responding_models {
        let rating = orchestrator
            .store
            .get_or_init_rating(model_id, session.category_id.as_deref(), orchestrator.config.initial_rating)
            .await?;
        current_ratings.insert(model_id.clone(), rating);
    }

    let engine = RatingEngine::new(
        orchestrator.config.k_provisional,
        orchestrator.config.k_elite,
        orchestrator.config.k_standard,
        orchestrator.config.provisional_games_threshold,
        orchestrator.config.elite_rating_threshold,
    );
    let (updates, matchups): (Vec<RatingUpdate>, Vec<_>) = engine.compute_session_update(
        responding_models,
        &session.labels,
        &current_ratings,
        votes,
        Some(session.id),
        session.category_id.as_deref(),
    );

    orchestrator
        .store
        .apply_rating_updates(session.id, &updates, &matchups)
        .await?;

    Ok(())
}

fn build_synthesis_prompt(session: &Session, votes: &[Vote]) -> String {
    format!(
        "Question: {}\n\nSynthesize the council's final answer from {} ballots.",
        session.question,
        votes.len()
    )
}
