//! `GET /api/status`: engine counters plus update diagnostics.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use qr_domain::model::RoomStatus;

use crate::state::EngineState;

pub async fn status(State(state): State<EngineState>) -> impl IntoResponse {
    let rooms = state.store.rooms(None).unwrap_or_default();
    let active_rooms = rooms
        .iter()
        .filter(|r| r.status == RoomStatus::Active)
        .count();

    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": rooms.len(),
        "activeRooms": active_rooms,
        "activeLoops": state.loops.active_count(),
        "updateDiagnostics": state.diagnostics.snapshot(),
    }))
}
