use axum::{
    extract::Request,
    routing::get,
    Router, ServiceExt,
};
use tower::Layer;
use tower_http::{
    cors::CorsLayer,
    normalize_path::{NormalizePath, NormalizePathLayer},
    trace::TraceLayer,
};
use tracing::info;

mod config;
mod db;
mod error;
mod handlers;
mod models;

use crate::config::Config;
use crate::db::Database;

/// Shared application state. Holds no product data; every request goes to the store.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (ignored in production where env vars are injected)
    dotenv::dotenv().ok();

    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,products_api=debug")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;

    info!(path = %config.database_path.display(), "Opening SQLite database...");
    let db = Database::connect(&config.database_path, config.max_connections).await?;
    info!("Schema ready.");

    let app = build_app(AppState { db: db.clone() }, &config.api_prefix);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Listening on http://{}{}", addr, config.api_prefix);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;

    db.close().await;
    Ok(())
}

/// Router wrapped so that `/products/` and `/products` resolve the same.
/// Path rewriting has to happen before routing, hence outside the `Router`.
fn build_app(state: AppState, prefix: &str) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(build_router(state, prefix))
}

fn build_router(state: AppState, prefix: &str) -> Router {
    let api = Router::new()
        // ── Health ──────────────────────────────────────────────────────────
        .route("/", get(handlers::health))

        // ── Products CRUD ───────────────────────────────────────────────────
        .route(
            "/products",
            get(handlers::products::list_products).post(handlers::products::create_product),
        )
        .route("/products/balance", get(handlers::products::get_balance))
        .route(
            "/products/:id",
            get(handlers::products::get_product)
                .put(handlers::products::update_product)
                .delete(handlers::products::delete_product),
        )
        .with_state(state);

    let router = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    // ── Middleware ──────────────────────────────────────────────────────────
    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
