//! HTTP frontend.
//!
//! Routes:
//!   GET  /healthz                     - always 200 OK (process is running)
//!   GET  /api/v1/health               - pool health JSON
//!   GET  /api/v1/status               - version, uptime, proxy counters
//!   POST /api/v1/recycle              - flag every worker for respawn
//!   GET  /api/v1/events               - SSE fan-out from the event hub
//!   POST /api/v1/channels/{channel}   - publish an event to a channel
//!   GET  /ws                          - WebSocket fan-out (bearer token when configured)
//!   /static/*                         - optional static file tree
//!   anything else                     - proxied to a worker
//!
//! Worker errors map to HTTP statuses here and nowhere else: timeout →
//! 504, disconnect → 502, everything else → 500.

pub mod events;
pub mod proxy;
pub mod ws;

use crate::hub::EventHub;
use crate::supervisor::Supervisor;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub hub: Arc<EventHub>,
    /// Bearer token required for WebSocket upgrades; None disables the check.
    pub auth_token: Option<String>,
    started_at: Instant,
    proxied: AtomicU64,
}

impl AppState {
    pub fn new(
        supervisor: Arc<Supervisor>,
        hub: Arc<EventHub>,
        auth_token: Option<String>,
    ) -> Arc<Self> {
        Arc::new(AppState {
            supervisor,
            hub,
            auth_token,
            started_at: Instant::now(),
            proxied: AtomicU64::new(0),
        })
    }

    pub(crate) fn note_proxied(&self) {
        self.proxied.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/recycle", post(post_recycle))
        .route("/api/v1/events", get(events::subscribe_sse))
        .route("/api/v1/channels/{channel}", post(events::publish_channel))
        .route("/ws", get(ws::ws_upgrade));
    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }
    router
        .fallback(proxy::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Control handlers
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.supervisor.health())
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "proxied_requests": state.proxied.load(Ordering::Relaxed),
        "workers": state.supervisor.health(),
    }))
}

async fn post_recycle(State(state): State<Arc<AppState>>) -> StatusCode {
    state.supervisor.force_recycle();
    StatusCode::ACCEPTED
}
