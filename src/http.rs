use crate::metrics::Metrics;
use crate::state::{ActionRecord, CycleReport, State as AgentState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<AgentState>>,
    pub miner_url: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub miner_url: String,
    pub started_at_unix: i64,
    pub cycles_total: u64,
    pub healthy: Option<bool>,
    pub last_cycle: Option<CycleReport>,
    pub last_action: Option<ActionRecord>,
}

impl ApiState {
    fn new(miner_url: &str, value: &AgentState) -> Self {
        Self {
            miner_url: miner_url.to_string(),
            started_at_unix: value.started_at_unix,
            cycles_total: value.cycles_total,
            healthy: value.last_cycle.as_ref().map(CycleReport::is_healthy),
            last_cycle: value.last_cycle.clone(),
            last_action: value.last_action,
        }
    }
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<AgentState>>,
    miner_url: String,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            miner_url,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    {
        let guard = state.state.read().await;
        state.metrics.update_from_state(&guard);
    }
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::new(&state.miner_url, &guard))
}
