//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the dashboard WebSocket stream at `/ws` and the
//! JSON health endpoints. Dashboard assets are served elsewhere; every route
//! here is cross-origin readable.

pub mod status;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/status", get(status::status))
        .route("/healthz", get(status::healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
