//! No-auth webhook endpoints keyed by 128-bit opaque tokens.
//!
//! `POST /api/hooks/task/:token` enqueues a run for the matching task;
//! `POST /api/hooks/queen/:token` posts a wake message into the room and
//! nudges its Queen. Token comparison is constant-time; each token gets
//! a sliding 30-per-60 s window and over-limit calls answer 429 with a
//! `retry-after` header.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use subtle::ConstantTimeEq;

use qr_domain::Error;

use crate::runtime::task_runner;
use crate::state::EngineState;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn rate_limited(retry_after_secs: u64) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(v) = retry_after_secs.to_string().parse() {
        headers.insert("retry-after", v);
    }
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(serde_json::json!({ "error": "rate limited" })),
    )
        .into_response()
}

/// Constant-time equality over the stored and presented tokens.
fn token_matches(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() == 1
}

pub async fn task_hook(
    State(state): State<EngineState>,
    Path(token): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    if let Err(Error::RateLimited { retry_after_secs }) = state.limiter.check(&token) {
        return rate_limited(retry_after_secs);
    }

    let task = match state.store.task_by_webhook_token(&token) {
        Ok(Some(task)) => task,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "unknown token"),
        Err(e) => {
            tracing::warn!(error = %e, "task hook lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed");
        }
    };
    match &task.webhook_token {
        Some(stored) if token_matches(stored, &token) => {}
        _ => return api_error(StatusCode::NOT_FOUND, "unknown token"),
    }

    if let Some(Json(payload)) = &body {
        tracing::debug!(task_id = task.id, payload = %payload, "task hook payload");
    }

    match task_runner::dispatch(&state, task.id) {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "task_id": task.id, "run_id": run_id })),
        )
            .into_response(),
        Err(e) if e.kind() == qr_domain::ErrorKind::InvalidState => {
            api_error(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => {
            tracing::warn!(task_id = task.id, error = %e, "task hook dispatch failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "dispatch failed")
        }
    }
}

pub async fn queen_hook(
    State(state): State<EngineState>,
    Path(token): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    if let Err(Error::RateLimited { retry_after_secs }) = state.limiter.check(&token) {
        return rate_limited(retry_after_secs);
    }

    let room = match state.store.room_by_webhook_token(&token) {
        Ok(Some(room)) => room,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "unknown token"),
        Err(e) => {
            tracing::warn!(error = %e, "queen hook lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "lookup failed");
        }
    };
    if !token_matches(&room.webhook_token, &token) {
        return api_error(StatusCode::NOT_FOUND, "unknown token");
    }

    let payload = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
    let wake_body = format!("webhook wake: {payload}");
    let queen_id = room.queen_worker_id;

    let posted = state
        .store
        .send_room_message(room.id, "webhook", queen_id, &wake_body);
    match posted {
        Ok(_) => {
            if let Some(queen_id) = queen_id {
                state.nudges.nudge_worker(queen_id);
            }
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "room_id": room.id })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(room_id = room.id, error = %e, "queen hook message failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "wake failed")
        }
    }
}
