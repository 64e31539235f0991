//! agentflow server: wires the store, hub, agent registry, and engine
//! behind the HTTP/WebSocket transport.

mod auth;
mod config;
mod error;
mod routes;
mod state;

use agentflow_agents::{AgentRegistry, BuiltinServices};
use agentflow_collab::CollabHub;
use agentflow_store::{InMemoryStore, PgMetadataStore};
use agentflow_workflow::engine::{EngineConfig, ExecutionEngine};
use agentflow_workflow::store::MetadataStore;
use auth::JwtVerifier;
use config::ServerConfig;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Metadata store: PostgreSQL when configured, in-memory otherwise
    let store: Arc<dyn MetadataStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("failed to connect to database");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");

            Arc::new(PgMetadataStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory metadata store");
            Arc::new(InMemoryStore::new())
        }
    };

    let hub = Arc::new(CollabHub::new());

    let services = BuiltinServices::production(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
    );
    let registry = Arc::new(AgentRegistry::with_builtins(
        Duration::from_secs(config.agent_timeout_seconds),
        services,
    ));

    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        hub.clone(),
        Arc::clone(&registry) as _,
        EngineConfig {
            max_concurrent_executions: config.max_concurrent_executions,
            execution_timeout: Duration::from_secs(config.execution_timeout_seconds),
            monitor_interval: Duration::from_secs(60),
        },
    ));
    engine.start();

    let jwt =
        JwtVerifier::new(&config.jwt.secret, &config.jwt.algorithm).expect("invalid jwt config");

    let app_state = Arc::new(AppState {
        store,
        engine: Arc::clone(&engine),
        hub,
        registry,
        jwt,
        ws: config.ws.clone(),
    });

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .expect("failed to bind to address");
    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .expect("server error");

    // Cancel in-flight executions and wait for them to drain
    engine.stop().await;
}
