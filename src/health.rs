use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::processor::{HealthStatus, ProcessorStatus};

#[derive(Clone)]
pub struct AppState {
    status: Arc<ProcessorStatus>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub metrics: HealthStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightResponse {
    pub in_flight: usize,
    pub timestamp: DateTime<Utc>,
}

pub fn create_health_api(status: Arc<ProcessorStatus>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/inflight", get(in_flight_handler))
        .with_state(AppState { status })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        metrics: state.status.health(),
    })
}

async fn in_flight_handler(State(state): State<AppState>) -> Json<InFlightResponse> {
    Json(InFlightResponse {
        in_flight: state.status.in_flight(),
        timestamp: Utc::now(),
    })
}
