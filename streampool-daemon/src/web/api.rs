//! HTTP handlers: routing, playlist and read-only pool views.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{
        header::{CONTENT_TYPE, LOCATION},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;
use streampool_protocol::{ChannelView, CycleKind, IngestRecord};

use crate::pool::Snapshot;
use crate::scheduler::{CycleOutcome, CycleTask};
use crate::web::state::WebState;

/// Playlist MIME type.
const M3U_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Pagination for history-style views.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Redirect to the best endpoint of a channel.
pub async fn route_channel(
    State(web_state): State<Arc<WebState>>,
    Path(channel_key): Path<String>,
) -> Response {
    let snapshot = web_state.publisher.current().await;
    match snapshot.best(&channel_key) {
        Ok(entry) => {
            debug!("Route {} -> {} (score {:.4})", channel_key, entry.url, entry.score);
            (StatusCode::FOUND, [(LOCATION, entry.url.clone())]).into_response()
        }
        Err(e) => {
            debug!("Route {}: {}", channel_key, e);
            (StatusCode::NOT_FOUND, "no source available").into_response()
        }
    }
}

/// One `#EXTINF` line per channel that can be routed.
pub fn render_playlist(snapshot: &Snapshot, base_url: &str) -> String {
    let mut out = String::from("#EXTM3U\n");
    for channel in snapshot.channels() {
        out.push_str(&extinf_line(channel));
        out.push('\n');
        out.push_str(&format!("{}/{}\n", base_url, channel.channel_key));
    }
    out
}

fn extinf_line(channel: &ChannelView) -> String {
    let title = channel.title.as_deref().unwrap_or(&channel.channel_key);
    match &channel.group_title {
        Some(group) => format!(
            "#EXTINF:-1 tvg-name=\"{}\" group-title=\"{}\",{}",
            channel.channel_key, group, title
        ),
        None => format!("#EXTINF:-1 tvg-name=\"{}\",{}", channel.channel_key, title),
    }
}

/// Playlist of every routable channel.
pub async fn get_playlist(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let snapshot = web_state.publisher.current().await;
    (
        StatusCode::OK,
        [(CONTENT_TYPE, M3U_CONTENT_TYPE)],
        render_playlist(&snapshot, &web_state.public_base_url),
    )
}

// ============================================================================
// Snapshot endpoints
// ============================================================================

/// Current snapshot.
pub async fn get_snapshot(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let snapshot = web_state.publisher.current().await;
    Json(json!({
        "success": true,
        "snapshot": &*snapshot
    }))
}

/// Published endpoints of one channel.
pub async fn get_channel(
    State(web_state): State<Arc<WebState>>,
    Path(channel_key): Path<String>,
) -> Response {
    let snapshot = web_state.publisher.current().await;
    match snapshot.channel(&channel_key) {
        Some(channel) => Json(json!({
            "success": true,
            "version": snapshot.version(),
            "channel": channel
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("no source available for channel {}", channel_key)
            })),
        )
            .into_response(),
    }
}

// ============================================================================
// Pool history endpoints
// ============================================================================

/// Quarantined endpoints, newest first.
pub async fn get_quarantine(
    State(web_state): State<Arc<WebState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let db = web_state.database.lock().await;
    match (db.get_quarantine(query.limit()), db.count_quarantine()) {
        (Ok(records), Ok(total)) => Json(json!({
            "success": true,
            "quarantine": records,
            "count": records.len(),
            "total": total
        })),
        (Err(e), _) | (_, Err(e)) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

/// Cycle history, newest first.
pub async fn get_cycles(
    State(web_state): State<Arc<WebState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let db = web_state.database.lock().await;
    match db.get_cycle_history(query.limit()) {
        Ok(cycles) => Json(json!({
            "success": true,
            "cycles": cycles,
            "count": cycles.len()
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

/// Coordinator metrics and pool totals.
pub async fn get_stats(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let snapshot = web_state.publisher.current().await;
    let (endpoints, quarantined) = {
        let db = web_state.database.lock().await;
        (
            db.count_endpoints().unwrap_or(0),
            db.count_quarantine().unwrap_or(0),
        )
    };

    Json(json!({
        "success": true,
        "stats": {
            "metrics": web_state.metrics.snapshot(),
            "coordinator": web_state.coordinator.status(),
            "active_endpoints": endpoints,
            "quarantined_endpoints": quarantined,
            "snapshot_version": snapshot.version(),
            "routable_channels": snapshot.channels().len(),
            "routable_endpoints": snapshot.entry_count()
        }
    }))
}

// ============================================================================
// Control endpoints
// ============================================================================

/// Run a health, media or purge cycle now, unless a task is already running.
pub async fn trigger_cycle(
    State(web_state): State<Arc<WebState>>,
    Path(kind): Path<String>,
) -> Response {
    let task = CycleKind::from_str(&kind)
        .ok()
        .and_then(CycleTask::periodic);
    let Some(task) = task else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!("unknown cycle kind: {}", kind)
            })),
        )
            .into_response();
    };

    // The cycle runs on its own task so a dropped request cannot cancel it.
    let coordinator = Arc::clone(&web_state.coordinator);
    let outcome = match tokio::spawn(async move { coordinator.run_now(task).await }).await {
        Ok(outcome) => outcome,
        Err(e) => CycleOutcome::Failed {
            error: format!("cycle task aborted: {}", e),
        },
    };
    let status = match &outcome {
        CycleOutcome::Completed(_) => StatusCode::OK,
        CycleOutcome::Skipped => StatusCode::CONFLICT,
        CycleOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "success": matches!(outcome, CycleOutcome::Completed(_)),
            "ran": !matches!(outcome, CycleOutcome::Skipped),
            "result": outcome
        })),
    )
        .into_response()
}

/// Queue a batch of ingest records.
pub async fn ingest(
    State(web_state): State<Arc<WebState>>,
    Json(records): Json<Vec<IngestRecord>>,
) -> Response {
    let count = records.len();
    if count == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "empty batch"})),
        )
            .into_response();
    }

    match web_state.coordinator.submit(CycleTask::Ingest(records)).await {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(json!({"success": true, "queued": count})),
        )
            .into_response(),
        Err(e) => {
            warn!("Ingest of {} records not queued: {}", count, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"success": false, "error": e.to_string()})),
            )
                .into_response()
        }
    }
}
