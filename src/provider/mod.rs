//! Provider Gateway contract.
//!
//! The concrete network client that actually talks to each LLM vendor is
//! out of scope — only the contract the orchestrator drives is modeled
//! here, plus the pool of gateway handles the orchestrator's resource
//! model owns.

pub mod mock;
pub mod pool;

use crate::error::AppResult;
use crate::models::Credential;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One streamed fragment of a model's response.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content_delta: String,
    pub done: bool,
}

/// The out-of-scope network boundary the orchestrator calls through.
/// `provider_credential` is forwarded verbatim and never inspected.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn list_models(&self, credential: &Credential) -> AppResult<Vec<String>>;

    async fn stream_prompt(
        &self,
        credential: &Credential,
        model_id: &str,
        prompt: &str,
    ) -> AppResult<BoxStream<'static, AppResult<Chunk>>>;

    async fn request_vote(
        &self,
        credential: &Credential,
        model_id: &str,
        ballot_prompt: &str,
    ) -> AppResult<Vec<String>>;

    async fn request_synthesis(
        &self,
        credential: &Credential,
        model_id: &str,
        synthesis_prompt: &str,
    ) -> AppResult<String>;
}
