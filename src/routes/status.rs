//! Health endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use time::OffsetDateTime;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(rename = "activeTCPClients")]
    pub active_tcp_clients: u64,
    pub total_messages: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub uptime_seconds: u64,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.aggregator.snapshot();
    Json(StatusResponse {
        ok: true,
        started_at: snap.started_at,
        active_tcp_clients: snap.counters.active_clients,
        total_messages: snap.counters.total_messages,
        total_bytes_in: snap.counters.total_bytes_in,
        total_bytes_out: snap.counters.total_bytes_out,
        last_message_at: snap.last_message_at,
        uptime_seconds: snap.uptime_seconds,
    })
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "status_test.rs"]
mod tests;
