//! The engine's HTTP surface: webhook hooks and the status endpoint.
//! The full REST/dashboard surface is peripheral transport and lives
//! elsewhere; only what the core owns is routed here.

pub mod hooks;
pub mod status;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::EngineState;

pub fn router(state: EngineState) -> Router {
    Router::new()
        .route("/api/hooks/task/:token", post(hooks::task_hook))
        .route("/api/hooks/queen/:token", post(hooks::queen_hook))
        .route("/api/status", get(status::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
