//! Council orchestrator.
//!
//! Drives one session's state machine end to end: response elicitation,
//! blind peer-ranking, synthesis, and the rating update that follows.
//! Every stage fans out with `tokio::spawn`, joins with
//! `futures::future::join_all`, and never lets one participant's panic or
//! timeout take the whole session down with it.

pub mod anonymize;
pub mod debate;
pub mod minority;
pub mod roles;
pub mod standard;
pub mod tournament;

use crate::config::Config;
use crate::error::AppResult;
use crate::events::EventHub;
use crate::models::{Credential, Session, SessionMode, SessionStatus};
use crate::provider::ProviderGateway;
use crate::rating::RatingEngine;
use crate::store::CouncilStore;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Cooperative cancellation signal for a single session. Built on `tokio::sync::watch` rather than
/// an external token crate — a single bool flip is all a session needs.
#[derive(Clone, Debug)]
pub struct CancelToken(tokio::sync::watch::Receiver<bool>);

pub struct CancelHandle(tokio::sync::watch::Sender<bool>);

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (CancelHandle(tx), CancelToken(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn cancelled(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct Orchestrator {
    pub store: Arc<dyn CouncilStore>,
    pub events: Arc<EventHub>,
    pub config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn CouncilStore>, events: Arc<EventHub>, config: Arc<Config>) -> Self {
        Self { store, events, config }
    }

    fn rating_engine(&self) -> RatingEngine {
        RatingEngine::new(
            self.config.k_provisional,
            self.config.k_elite,
            self.config.k_standard,
            self.config.provisional_games_threshold,
            self.config.elite_rating_threshold,
        )
    }

    /// Computes and durably persists the mystery judge / devil's advocate
    /// / chairperson assignment and the anonymous-label mapping, once,
    /// before the first responding round. Returns the set
    /// of models that actually respond this session.
    async fn prepare_roles_and_labels(
        &self,
        session: &mut Session,
    ) -> AppResult<Vec<crate::models::ModelId>> {
        let mut global_ratings = std::collections::BTreeMap::new();
        for model_id in &session.participant_models {
            let rating = self
                .store
                .get_or_init_rating(model_id, None, self.config.initial_rating)
                .await?;
            global_ratings.insert(model_id.clone(), rating);
        }

        let assignment = roles::assign_roles(
            &session.participant_models,
            &session.config,
            session.rng_seed,
            session.chairperson_model_id.as_deref(),
            &global_ratings,
        );

        let labels = anonymize::assign_labels(&assignment.responding_models, session.rng_seed);

        self.store
            .set_roles_and_labels(
                session.id,
                assignment.chairperson.as_deref(),
                assignment.devils_advocate.as_deref(),
                assignment.mystery_judge.as_deref(),
                &labels,
            )
            .await?;

        session.chairperson_model_id = assignment.chairperson;
        session.devils_advocate_model_id = assignment.devils_advocate;
        session.mystery_judge_model_id = assignment.mystery_judge;
        session.labels = labels;

        Ok(assignment.responding_models)
    }

    /// Drives `session` to a terminal state. Never returns `Err` for a
    /// per-participant or stage failure — those are durable transitions
    /// to `Failed`; `Err` here means the store itself is
    /// unreachable and the caller should treat the session as stuck.
    #[instrument(skip(self, credential, gateway), fields(session_id = %session.id, mode = ?session.mode))]
    pub async fn run(
        &self,
        mut session: Session,
        credential: Credential,
        gateway: Arc<dyn ProviderGateway>,
        cancel: CancelToken,
    ) -> AppResult<()> {
        info!("council session starting");

        let outcome = match session.mode {
            SessionMode::Standard => {
                standard::run_standard(self, &mut session, &credential, gateway.clone(), cancel.clone())
                    .await
            }
            SessionMode::Debate => {
                debate::run_debate(self, &mut session, &credential, gateway.clone(), cancel.clone())
                    .await
            }
            SessionMode::Tournament => {
                tournament::run_tournament(
                    self,
                    &mut session,
                    &credential,
                    gateway.clone(),
                    cancel.clone(),
                )
                .await
            }
        };

        match outcome {
            Ok(()) => {
                info!("council session completed");
                Ok(())
            }
            Err(crate::error::AppError::Cancelled) => {
                warn!("council session cancelled");
                self.store
                    .update_status(session.id, SessionStatus::Cancelled, None)
                    .await?;
                self.events
                    .publish(session.id, crate::models::EventPayload::CouncilCancelled)
                    .await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "council session failed");
                self.store
                    .update_status(session.id, SessionStatus::Failed, Some(&e.to_string()))
                    .await?;
                self.events
                    .publish(
                        session.id,
                        crate::models::EventPayload::CouncilFailed { reason: e.to_string() },
                    )
                    .await;
                Ok(())
            }
        }
    }

    /// Fans a prompt out to every model in `responding_models` in parallel
    /// (one `tokio::spawn` per model), streams each model's chunks onto the
    /// session's event topic as they arrive, and durably stores every
    /// response that completes. A model that errors or blows its timeout
    /// is dropped from the round rather than failing the whole session --
    /// only a round where *every* participant fails escalates to
    /// `StageFailure`.
    pub(crate) async fn race_responses(
        &self,
        session: &Session,
        round: u32,
        responding_models: &[crate::models::ModelId],
        credential: &Credential,
        gateway: Arc<dyn ProviderGateway>,
        prompt_for: impl Fn(&str) -> String,
        mut cancel: CancelToken,
    ) -> AppResult<Vec<crate::models::Response>> {
        use crate::models::{EventPayload, Response};
        use futures::stream::StreamExt;

        let timeout = std::time::Duration::from_secs(session.config.response_timeout_secs);
        let mut handles = Vec::new();

        for model_id in responding_models {
            let model_id = model_id.clone();
            let label = session
                .labels
                .get(&model_id)
                .cloned()
                .unwrap_or_else(|| model_id.clone());
            let prompt = prompt_for(&model_id);
            let credential = credential.clone();
            let gateway = gateway.clone();
            let events = self.events.clone();
            let session_id = session.id;

            // Streamed into from inside `work` as chunks arrive, and read
            // back out after `work` is cancelled by the timeout or fails --
            // an error or timeout must not lose the content collected so
            // far, only stop collecting more of it.
            let partial = Arc::new(std::sync::Mutex::new(String::new()));

            let handle = tokio::spawn(async move {
                events
                    .publish(
                        session_id,
                        EventPayload::ModelResponding {
                            model_id: model_id.clone(),
                            label: label.clone(),
                        },
                    )
                    .await;

                let started = std::time::Instant::now();
                let work = async {
                    let mut stream = gateway.stream_prompt(&credential, &model_id, &prompt).await?;
                    let mut token_count = 0u64;
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        partial.lock().unwrap().push_str(&chunk.content_delta);
                        token_count += chunk.content_delta.split_whitespace().count() as u64;
                        events
                            .publish(
                                session_id,
                                EventPayload::ModelResponseChunk {
                                    label: label.clone(),
                                    content_delta: chunk.content_delta,
                                    done: chunk.done,
                                },
                            )
                            .await;
                        if chunk.done {
                            break;
                        }
                    }
                    Ok::<_, crate::error::AppError>(token_count)
                };

                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(token_count)) => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        events
                            .publish(
                                session_id,
                                EventPayload::ModelComplete {
                                    label: label.clone(),
                                    response_time_ms: elapsed_ms,
                                },
                            )
                            .await;
                        let content = partial.lock().unwrap().clone();
                        (model_id, label, content, token_count, elapsed_ms, Ok(()))
                    }
                    Ok(Err(e)) => {
                        let content = partial.lock().unwrap().clone();
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        (model_id, label, content, 0, elapsed_ms, Err(e))
                    }
                    Err(_) => {
                        let content = partial.lock().unwrap().clone();
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        let model_id_for_err = model_id.clone();
                        (
                            model_id,
                            label,
                            content,
                            0,
                            elapsed_ms,
                            Err(crate::error::AppError::ProviderFailure {
                                model_id: model_id_for_err,
                                reason: "response timed out".to_string(),
                            }),
                        )
                    }
                }
            });
            handles.push(handle);
        }

        let joined = tokio::select! {
            results = futures::future::join_all(handles) => results,
            _ = cancel.cancelled() => {
                return Err(crate::error::AppError::Cancelled);
            }
        };

        // Every participant gets a Response row, success or failure: a
        // stream error or timeout records whatever partial content was
        // collected before it was cut off rather than discarding it.
        let mut responses = Vec::new();
        let mut any_succeeded = false;
        for joined_result in joined {
            match joined_result {
                Ok((model_id, label, content, token_count, elapsed_ms, outcome)) => {
                    if let Err(e) = &outcome {
                        warn!(model_id, error = %e, "participant failed, recording partial content");
                    } else {
                        any_succeeded = true;
                    }
                    let response = Response {
                        id: 0,
                        session_id: session.id,
                        model_id,
                        round,
                        content,
                        anonymous_label: label,
                        response_time_ms: elapsed_ms,
                        token_count,
                        created_at: chrono::Utc::now(),
                    };
                    let stored = self.store.append_response(&response).await?;
                    responses.push(stored);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "participant task panicked, no response row recorded");
                }
            }
        }

        if !any_succeeded {
            return Err(crate::error::AppError::StageFailure(
                "every participant failed to respond".to_string(),
            ));
        }

        Ok(responses)
    }
}
