//! HTTP trigger for discovery runs.
//!
//! - `GET  /api/discover` reports which credentials are configured.
//! - `POST /api/discover` runs the pipeline once and returns the run result.
//! - `GET  /health` is a liveness probe.
//!
//! Overlapping runs in the same process are refused with 409. There is no
//! lock across processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use obituary_core::{ConfigPresence, DiscoveryPipeline, RunOutcome, SilentProgress};
use obituary_shared::{ObituaryError, Result};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<DiscoveryPipeline>,
    presence: ConfigPresence,
    running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(pipeline: DiscoveryPipeline, presence: ConfigPresence) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            presence,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the in-process run slot. `None` if a run is already going.
    fn try_start(&self) -> Option<RunSlot> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunSlot {
                running: Arc::clone(&self.running),
            })
    }
}

/// Releases the run slot when dropped, including on panic or cancellation.
struct RunSlot {
    running: Arc<AtomicBool>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/discover", get(discover_status).post(discover_run))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    if !state.pipeline.requires_auth() {
        warn!("no run secret configured, POST /api/discover is open to anyone");
    }

    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| ObituaryError::Network(format!("failed to bind {bind}: {e}")))?;
    info!(%bind, "discovery trigger listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| ObituaryError::Network(format!("server error: {e}")))
}

/// Run discovery every `every`, skipping ticks that overlap a running run.
pub fn spawn_interval(state: AppState, every: Duration) -> JoinHandle<()> {
    info!(interval_minutes = every.as_secs() / 60, "starting discovery interval loop");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(_slot) = state.try_start() else {
                info!("discovery already running, skipping interval tick");
                continue;
            };
            if let Err(e) = state.pipeline.run(&SilentProgress).await {
                error!(error = %e, "interval discovery run failed");
            }
        }
    })
}

// --- HTTP handlers ---

async fn health() -> &'static str {
    "ok"
}

async fn discover_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "configured": state.presence,
    }))
}

async fn discover_run(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let presented = bearer_token(&headers);
    if !state.pipeline.authorize(presented) {
        return unauthorized();
    }

    let Some(_slot) = state.try_start() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "Discovery run already in progress"})),
        )
            .into_response();
    };

    match state.pipeline.trigger(presented, &SilentProgress).await {
        RunOutcome::Completed(result) => (StatusCode::OK, Json(result)).into_response(),
        RunOutcome::Unauthorized => unauthorized(),
        RunOutcome::Failed(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Discovery run failed",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized"})),
    )
        .into_response()
}

/// The token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
