//! Tournament mode: single-elimination bracket over the participant pool,
//! each match judged by blind peer-ranking between the two contenders, a
//! bye for the odd one out, and a champion synthesis at the end.

use super::{anonymize, CancelToken, Orchestrator};
use crate::error::{AppError, AppResult};
use crate::models::{Credential, EventPayload, ModelId, Session, SessionStatus, Vote, VoterType};
use crate::provider::ProviderGateway;
use crate::rating::RatingEngine;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

const BRACKET_SEED_OFFSET: u64 = 0x7462; // "tb"

pub async fn run_tournament(
    orchestrator: &Orchestrator,
    session: &mut Session,
    credential: &Credential,
    gateway: Arc<dyn ProviderGateway>,
    cancel: CancelToken,
) -> AppResult<()> {
    let mut bracket = session.participant_models.clone();
    let mut rng = ChaCha8Rng::seed_from_u64(session.rng_seed.wrapping_add(BRACKET_SEED_OFFSET));
    bracket.shuffle(&mut rng);

    let labels = anonymize::assign_labels(&session.participant_models, session.rng_seed);
    orchestrator
        .store
        .set_roles_and_labels(session.id, None, None, None, &labels)
        .await?;
    session.labels = labels;

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

    let mut round_index = 0u32;
    let mut all_votes: Vec<Vote> = Vec::new();
    while bracket.len() > 1 {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut next_round = Vec::new();
        let mut pairs: Vec<(ModelId, Option<ModelId>)> = Vec::new();
        let mut iter = bracket.into_iter();
        while let Some(a) = iter.next() {
            pairs.push((a, iter.next()));
        }

        for (a, maybe_b) in pairs {
            let Some(b) = maybe_b else {
                // Odd one out advances without playing (a bye).
                next_round.push(a);
                continue;
            };

            let (winner, votes) = run_match(
                orchestrator,
                session,
                round_index,
                &a,
                &b,
                credential,
                gateway.clone(),
                cancel.clone(),
            )
            .await?;
            all_votes.extend(votes);
            next_round.push(winner);
        }

        bracket = next_round;
        round_index += 1;
    }

    let champion = bracket
        .into_iter()
        .next()
        .ok_or_else(|| AppError::StageFailure("tournament produced no champion".to_string()))?;

    // One aggregated rating update over the whole original participant
    // pool and every ballot cast across every match, rather than an
    // incremental update after each match -- a pair that never played
    // each other contributes no matchup (see `RatingEngine::pairwise_score`).
    let mut current_ratings = BTreeMap::new();
    for model_id in &session.participant_models {
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
    let (updates, matchups) = engine.compute_session_update(
        &session.participant_models,
        &session.labels,
        &current_ratings,
        &all_votes,
        Some(session.id),
        session.category_id.as_deref(),
    );
    orchestrator
        .store
        .apply_rating_updates(session.id, &updates, &matchups)
        .await?;

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Synthesizing, None)
        .await?;
    orchestrator.events.publish(session.id, EventPayload::SynthesisStarted).await;

    let synthesis_prompt = format!(
        "Question: {}\n\nYou won the council tournament. Give the final answer.",
        session.question
    );
    let synthesis = gateway
        .request_synthesis(credential, &champion, &synthesis_prompt)
        .await
        .map_err(|e| AppError::StageFailure(format!("champion synthesis failed: {e}")))?;

    orchestrator
        .store
        .set_synthesis(session.id, &synthesis, None)
        .await?;
    session.synthesis = Some(synthesis);

    let champion_label = session
        .labels
        .get(&champion)
        .cloned()
        .unwrap_or_else(|| champion.clone());

    orchestrator
        .store
        .update_status(session.id, SessionStatus::Completed, None)
        .await?;
    orchestrator
        .events
        .publish(
            session.id,
            EventPayload::TournamentChampion {
                winner_label: champion_label,
                winner_model_id: champion,
            },
        )
        .await;
    orchestrator.events.publish(session.id, EventPayload::CouncilCompleted).await;

    Ok(())
}

/// One bracket match: both contenders respond, every tournament
/// participant still standing casts a two-way ballot, and the higher raw
/// Borda score on that match's ballots advances -- the rating engine
/// plays no part in picking a winner, only in the aggregated update run
/// once the whole bracket is done. A tie is broken by current global
/// rating, then lexicographically by model id, so the match always has a
/// single winner.
async fn run_match(
    orchestrator: &Orchestrator,
    session: &mut Session,
    round: u32,
    a: &str,
    b: &str,
    credential: &Credential,
    gateway: Arc<dyn ProviderGateway>,
    cancel: CancelToken,
) -> AppResult<(ModelId, Vec<Vote>)> {
    let contenders = vec![a.to_string(), b.to_string()];
    let question = session.question.clone();

    let responses = orchestrator
        .race_responses(
            session,
            round,
            &contenders,
            credential,
            gateway.clone(),
            move |_model_id| question.clone(),
            cancel,
        )
        .await?;

    if responses.len() == 1 {
        // The other contender failed outright; the respondent advances.
        return Ok((responses[0].model_id.clone(), Vec::new()));
    }

    let ballot_prompt = responses
        .iter()
        .map(|r| format!("[{}]: {}\n\n", r.anonymous_label, r.content))
        .collect::<String>();

    let mut votes = Vec::new();
    for voter in [a, b] {
        let ballot = gateway
            .request_vote(credential, voter, &ballot_prompt)
            .await
            .unwrap_or_default();
        if ballot.is_empty() {
            continue;
        }
        let vote = Vote {
            id: 0,
            session_id: session.id,
            voter_type: VoterType::Model,
            voter_id: voter.to_string(),
            ranked_responses: ballot,
            weight: orchestrator.config.model_vote_weight,
            created_at: Utc::now(),
        };
        votes.push(orchestrator.store.append_vote(&vote).await?);
    }

    let label_a = session.labels.get(a).cloned().unwrap_or_else(|| a.to_string());
    let label_b = session.labels.get(b).cloned().unwrap_or_else(|| b.to_string());
    let borda = RatingEngine::borda_scores(&votes);
    let score_a = borda.get(&label_a).copied().unwrap_or(0.0);
    let score_b = borda.get(&label_b).copied().unwrap_or(0.0);

    let winner = if score_a > score_b {
        a.to_string()
    } else if score_b > score_a {
        b.to_string()
    } else {
        let rating_a = orchestrator
            .store
            .get_or_init_rating(a, session.category_id.as_deref(), orchestrator.config.initial_rating)
            .await?
            .rating;
        let rating_b = orchestrator
            .store
            .get_or_init_rating(b, session.category_id.as_deref(), orchestrator.config.initial_rating)
            .await?
            .rating;
        if rating_a > rating_b {
            a.to_string()
        } else if rating_b > rating_a {
            b.to_string()
        } else if a <= b {
            a.to_string()
        } else {
            b.to_string()
        }
    };

    Ok((winner, votes))
}
