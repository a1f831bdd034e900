mod handlers;
mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/resolve", get(handlers::resolve))
        .route("/api/resolve/batch", post(handlers::resolve_batch))
        .route("/api/cache/stats", get(handlers::cache_stats))
        .route("/api/cache", delete(handlers::clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub async fn start(host: &str, port: u16, state: AppState) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("geoloc server listening on http://{}", addr);
    eprintln!("  geoloc server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}
