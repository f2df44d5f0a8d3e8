//! Deterministic mock gateway used by orchestrator tests.
//!
//! Callers configure per-model outcomes up front (a response, a vote, a
//! synthesis, or a failure) and the mock replays them without any network
//! involved.

use crate::error::{AppError, AppResult};
use crate::models::Credential;
use crate::provider::{Chunk, ProviderGateway};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Respond(String),
    Fail(String),
}

pub struct MockProviderGateway {
    models: Vec<String>,
    responses: Mutex<HashMap<String, ScriptedOutcome>>,
    votes: Mutex<HashMap<String, Vec<String>>>,
    syntheses: Mutex<HashMap<String, String>>,
}

impl MockProviderGateway {
    pub fn new(models: Vec<String>) -> Self {
        Self {
            models,
            responses: Mutex::new(HashMap::new()),
            votes: Mutex::new(HashMap::new()),
            syntheses: Mutex::new(HashMap::new()),
        }
    }

    pub async fn script_response(&self, model_id: &str, outcome: ScriptedOutcome) {
        self.responses
            .lock()
            .await
            .insert(model_id.to_string(), outcome);
    }

    pub async fn script_vote(&self, voter_model_id: &str, ranked_labels: Vec<String>) {
        self.votes
            .lock()
            .await
            .insert(voter_model_id.to_string(), ranked_labels);
    }

    pub async fn script_synthesis(&self, model_id: &str, synthesis: String) {
        self.syntheses
            .lock()
            .await
            .insert(model_id.to_string(), synthesis);
    }
}

#[async_trait]
impl ProviderGateway for MockProviderGateway {
    async fn list_models(&self, _credential: &Credential) -> AppResult<Vec<String>> {
        Ok(self.models.clone())
    }

    async fn stream_prompt(
        &self,
        _credential: &Credential,
        model_id: &str,
        _prompt: &str,
    ) -> AppResult<BoxStream<'static, AppResult<Chunk>>> {
        let outcome = self
            .responses
            .lock()
            .await
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| ScriptedOutcome::Respond(format!("{model_id} has no opinion.")));

        match outcome {
            ScriptedOutcome::Respond(text) => {
                let chunks: Vec<AppResult<Chunk>> = text
                    .split_whitespace()
                    .map(|word| {
                        Ok(Chunk {
                            content_delta: format!("{word} "),
                            done: false,
                        })
                    })
                    .chain(std::iter::once(Ok(Chunk {
                        content_delta: String::new(),
                        done: true,
                    })))
                    .collect();
                Ok(stream::iter(chunks).boxed())
            }
            ScriptedOutcome::Fail(reason) => Ok(stream::iter(vec![Err(AppError::ProviderFailure {
                model_id: model_id.to_string(),
                reason,
            })])
            .boxed()),
        }
    }

    async fn request_vote(
        &self,
        _credential: &Credential,
        model_id: &str,
        _ballot_prompt: &str,
    ) -> AppResult<Vec<String>> {
        self.votes
            .lock()
            .await
            .get(model_id)
            .cloned()
            .ok_or_else(|| AppError::ProviderFailure {
                model_id: model_id.to_string(),
                reason: "no scripted ballot".to_string(),
            })
    }

    async fn request_synthesis(
        &self,
        _credential: &Credential,
        model_id: &str,
        _synthesis_prompt: &str,
    ) -> AppResult<String> {
        self.syntheses
            .lock()
            .await
            .get(model_id)
            .cloned()
            .ok_or_else(|| AppError::ProviderFailure {
                model_id: model_id.to_string(),
                reason: "no scripted synthesis".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            user_id: "u1".into(),
            provider_credential: "tok".into(),
        }
    }

    #[tokio::test]
    async fn streams_scripted_response_as_chunks() {
        let gateway = MockProviderGateway::new(vec!["gpt".into()]);
        gateway
            .script_response("gpt", ScriptedOutcome::Respond("hello world".into()))
            .await;

        let mut stream = gateway
            .stream_prompt(&credential(), "gpt", "question")
            .await
            .unwrap();

        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assembled.push_str(&chunk.content_delta);
            if chunk.done {
                break;
            }
        }
        assert_eq!(assembled.trim(), "hello world");
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_provider_failure() {
        let gateway = MockProviderGateway::new(vec!["gpt".into()]);
        gateway
            .script_response("gpt", ScriptedOutcome::Fail("rate limited".into()))
            .await;

        let mut stream = gateway
            .stream_prompt(&credential(), "gpt", "question")
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(AppError::ProviderFailure { .. })));
    }
}
