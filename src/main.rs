//! Council Orchestrator service entry point.

use anyhow::{Context, Result};
use council_orchestrator::api::{build_router, AppState};
use council_orchestrator::config::Config;
use council_orchestrator::events::EventHub;
use council_orchestrator::orchestrator::Orchestrator;
use council_orchestrator::provider::mock::MockProviderGateway;
use council_orchestrator::provider::pool::ProviderPool;
use council_orchestrator::provider::ProviderGateway;
use council_orchestrator::store::sqlite::SqliteCouncilStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    info!(database_path = %config.database_path, port = config.bind_port, "council orchestrator starting");

    let store = Arc::new(
        SqliteCouncilStore::new(&config.database_path).context("failed to open council store")?,
    );
    let events = Arc::new(EventHub::new(config.subscriber_buffer_size));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), events.clone(), config.clone()));
    let provider_pool = Arc::new(ProviderPool::new(Duration::from_secs(
        config.provider_idle_evict_secs,
    )));

    // The concrete network client that talks to each LLM vendor is out of
    // scope -- the pool hands out a scripted mock in its
    // place so the orchestrator's resource model still has something to
    // check in and out.
    let gateway_factory: Arc<dyn Fn() -> Arc<dyn ProviderGateway> + Send + Sync> =
        Arc::new(|| Arc::new(MockProviderGateway::new(Vec::new())));

    let app_state = AppState::new(
        store,
        events.clone(),
        config.clone(),
        orchestrator,
        provider_pool.clone(),
        gateway_factory,
    );

    tokio::spawn(evict_idle_providers(provider_pool, config.provider_idle_evict_secs));

    let app = build_router(app_state).layer(CorsLayer::permissive()).layer(
        axum::middleware::from_fn(council_orchestrator::middleware::request_logging),
    );

    let addr = format!("0.0.0.0:{}", config.bind_port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind listener")?;
    info!(%addr, "council orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(events))
        .await
        .context("server error")?;

    Ok(())
}

async fn evict_idle_providers(pool: Arc<ProviderPool>, idle_evict_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(idle_evict_secs.max(60)));
    loop {
        ticker.tick().await;
        let evicted = pool.evict_idle().await;
        if evicted > 0 {
            info!(evicted, "swept idle provider gateways");
        }
    }
}

/// Waits for Ctrl+C, then drops every live event subscriber so in-flight
/// websocket handlers see `None` and exit cleanly.
async fn shutdown_signal(events: Arc<EventHub>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining event subscribers");
    events.shutdown().await;
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "council_orchestrator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
