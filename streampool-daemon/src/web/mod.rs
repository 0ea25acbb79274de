//! HTTP server: channel routing, playlist and pool API.

pub mod api;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::WebState;

/// Build the router over shared state.
pub fn build_router(web_state: Arc<WebState>) -> Router {
    Router::new()
        .route("/api/snapshot", get(api::get_snapshot))
        .route("/api/channel/:key", get(api::get_channel))
        .route("/api/quarantine", get(api::get_quarantine))
        .route("/api/cycles", get(api::get_cycles))
        .route("/api/stats", get(api::get_stats))
        .route("/api/cycle/:kind", post(api::trigger_cycle))
        .route("/api/ingest", post(api::ingest))
        .route("/playlist.m3u8", get(api::get_playlist))
        // Channel routing
        .route("/:channel_key", get(api::route_channel))
        .with_state(web_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until the token is cancelled.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    web_state: Arc<WebState>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(web_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Web server listening on http://{}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
