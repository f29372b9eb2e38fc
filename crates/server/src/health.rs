//! Operational endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub app_name: String,
    pub version: String,
    pub env: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// GET `urls.version`
pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        app_name: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        env: state.config.env.clone(),
    })
}

/// GET `urls.healthcheck`
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
