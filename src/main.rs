//! POS Sync
//!
//! Local cache service for the POS client: keeps an embedded SQLite copy of the
//! seller's collections and reconciles it with the remote service whenever a view
//! mounts or regains focus, without dropping writes that have not been uploaded.

mod api;
mod config;
mod db;
mod errors;
mod models;
mod remote;
mod sync;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::LocalStore;
use models::EntityType;
use remote::HttpRemote;
use sync::{Reconciler, StandardRules};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting POS sync service");
    tracing::info!("Cache path: {:?}", config.db_path);
    tracing::info!("Remote service: {}", config.remote_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.seller_id.is_none() {
        tracing::warn!("No seller identity configured (POS_SYNC_SELLER_ID). Fetches without x-seller-id are unscoped");
    }

    // Initialize the local cache
    let pool = db::init_database(&config.db_path).await?;
    let store = LocalStore::new(pool);

    for entity in EntityType::ALL {
        let cached = store.count(entity).await?;
        tracing::info!("Cached {} records: {}", entity, cached);
    }

    let remote = HttpRemote::new(&config.remote_url, config.remote_token.clone())?;
    let reconciler = Reconciler::new(
        store,
        Arc::new(remote),
        Arc::new(StandardRules),
        config.probe_timeout,
        config.cycle_timeout,
    );

    let state = AppState {
        reconciler: Arc::new(reconciler),
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/collections/{entity}", get(api::reconcile_collection))
        .route("/collections/{entity}/local", get(api::local_snapshot))
        .route("/collections/{entity}/records", post(api::create_record))
        .route(
            "/collections/{entity}/records/{id}",
            put(api::update_record).delete(api::delete_record),
        )
        .route(
            "/collections/{entity}/records/{id}/synced",
            post(api::mark_synced),
        );

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
