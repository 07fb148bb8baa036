//! Banner and health endpoints, shared by every service

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Broker link as seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BrokerStatus {
    Connected,
    Unavailable,
    /// The service does not use the broker
    NotUsed,
}

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub broker: BrokerStatus,
}

/// Service banner
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Service banner", body = String)
    )
)]
pub async fn root(State(state): State<AppState>) -> &'static str {
    state.service.banner()
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let broker = match &state.broker {
        None => BrokerStatus::NotUsed,
        Some(handle) if handle.registry.is_available() => BrokerStatus::Connected,
        Some(_) => BrokerStatus::Unavailable,
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        broker,
    })
}
