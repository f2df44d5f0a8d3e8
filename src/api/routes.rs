//! Session API surface: admission, read-back, cancellation,
//! and the live event stream.

use crate::api::dto::{SessionView, StartSessionRequest, StartSessionResponse};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::EventHub;
use crate::models::{Credential, Session, SessionId, SessionMode, SessionStatus};
use crate::orchestrator::{CancelHandle, Orchestrator};
use crate::provider::pool::ProviderPool;
use crate::provider::ProviderGateway;
use crate::store::CouncilStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CouncilStore>,
    pub events: Arc<EventHub>,
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub provider_pool: Arc<ProviderPool>,
    pub gateway_factory: Arc<dyn Fn() -> Arc<dyn ProviderGateway> + Send + Sync>,
    cancel_handles: Arc<Mutex<HashMap<SessionId, CancelHandle>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CouncilStore>,
        events: Arc<EventHub>,
        config: Arc<Config>,
        orchestrator: Arc<Orchestrator>,
        provider_pool: Arc<ProviderPool>,
        gateway_factory: Arc<dyn Fn() -> Arc<dyn ProviderGateway> + Send + Sync>,
    ) -> Self {
        Self {
            store,
            events,
            config,
            orchestrator,
            provider_pool,
            gateway_factory,
            cancel_handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/cancel", post(cancel_session))
        .route("/api/sessions/:id/events", get(session_events))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

/// Admits a new council session and kicks the orchestrator off in the
/// background; the caller follows up on `/api/sessions/:id` or the event
/// stream rather than blocking on the whole deliberation.
async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> AppResult<Json<StartSessionResponse>> {
    request.validate(&state.config)?;

    let session_config = request.to_session_config(&state.config);
    let rng_seed = rand::thread_rng().gen();

    let session = Session {
        id: SessionId::new_v4(),
        user_id: "anonymous".to_string(),
        question: request.question,
        mode: request.mode,
        category_id: request.category_id,
        participant_models: request.participant_models,
        chairperson_model_id: request.chairperson_model_id,
        devils_advocate_model_id: None,
        mystery_judge_model_id: None,
        synthesis: None,
        minority_report: None,
        config: session_config,
        status: SessionStatus::Pending,
        created_at: chrono::Utc::now(),
        completed_at: None,
        failure_reason: None,
        rng_seed,
        labels: Default::default(),
    };

    state.store.create_session(&session).await?;

    let gateway = state
        .provider_pool
        .checkout(&session.user_id, || (state.gateway_factory)())
        .await;
    let credential = Credential {
        user_id: session.user_id.clone(),
        provider_credential: String::new(),
    };

    let (handle, token) = CancelHandle::new();
    state.cancel_handles.lock().await.insert(session.id, handle);

    let orchestrator = state.orchestrator.clone();
    let session_id = session.id;
    let cancel_handles = state.cancel_handles.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(session, credential, gateway, token).await {
            warn!(%session_id, error = %e, "orchestrator run returned an error");
        }
        cancel_handles.lock().await.remove(&session_id);
    });

    Ok(Json(StartSessionResponse {
        session_id: session_id.to_string(),
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> AppResult<Json<SessionView>> {
    let session = state.store.get_session(id).await?;
    Ok(Json(session.into()))
}

async fn cancel_session(State(state): State<AppState>, Path(id): Path<SessionId>) -> AppResult<()> {
    let handles = state.cancel_handles.lock().await;
    let handle = handles
        .get(&id)
        .ok_or_else(|| AppError::not_found(format!("no running session {id}")))?;
    handle.cancel();
    info!(%id, "cancellation requested");
    Ok(())
}

async fn session_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Response {
    ws.on_upgrade(move |socket| stream_session_events(socket, state, id))
}

async fn stream_session_events(mut socket: WebSocket, state: AppState, session_id: SessionId) {
    let mut subscription = state.events.subscribe(session_id).await;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%session_id, error = %e, "failed to serialize event");
                        continue;
                    }
                };
                let terminal = matches!(
                    event.payload,
                    crate::models::EventPayload::CouncilCompleted
                        | crate::models::EventPayload::CouncilFailed { .. }
                        | crate::models::EventPayload::CouncilCancelled
                );
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.events.unsubscribe(&subscription).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProviderGateway;
    use crate::store::sqlite::SqliteCouncilStore;

    fn test_state() -> AppState {
        let store = Arc::new(SqliteCouncilStore::new(":memory:").unwrap());
        let events = Arc::new(EventHub::new(16));
        let config = Arc::new(Config::default());
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), events.clone(), config.clone()));
        let pool = Arc::new(ProviderPool::new(Duration::from_secs(600)));
        let factory: Arc<dyn Fn() -> Arc<dyn ProviderGateway> + Send + Sync> =
            Arc::new(|| Arc::new(MockProviderGateway::new(vec!["gpt".into(), "claude".into()])));
        AppState::new(store, events, config, orchestrator, pool, factory)
    }

    #[tokio::test]
    async fn rejects_a_session_with_too_few_participants() {
        let state = test_state();
        let request = StartSessionRequest {
            question: "what should we build next?".to_string(),
            mode: SessionMode::Standard,
            participant_models: vec!["gpt".to_string()],
            category_id: None,
            chairperson_model_id: None,
            debate_rounds: None,
            response_timeout_secs: None,
            mystery_judge_enabled: None,
            devils_advocate_enabled: None,
        };
        let result = start_session(State(state), Json(request)).await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn admits_a_valid_session_and_it_becomes_readable() {
        let state = test_state();
        let request = StartSessionRequest {
            question: "what should we build next?".to_string(),
            mode: SessionMode::Standard,
            participant_models: vec!["gpt".to_string(), "claude".to_string()],
            category_id: None,
            chairperson_model_id: None,
            debate_rounds: None,
            response_timeout_secs: None,
            mystery_judge_enabled: None,
            devils_advocate_enabled: None,
        };
        let response = start_session(State(state.clone()), Json(request)).await.unwrap();
        let id: SessionId = response.0.session_id.parse().unwrap();

        let view = get_session(State(state), Path(id)).await.unwrap();
        assert_eq!(view.0.id, id.to_string());
    }
}
