//! Defines the Axum API routes and handlers.

use crate::camera::FrameHub;
use crate::motion::MotorStatus;
use crate::rail::{BurstCommand, FocusRail, RailError, RailRequest};
use crate::web::models::{BurstRequest, MoveRequest};
use crate::web::stream::mjpeg_response;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::{mpsc::Sender, oneshot};

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn rail_error(error: RailError) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }
    json_error(&error.to_string(), status)
}

pub struct AppStateInner {
    /// Direct access for emergency stop and status reads.
    pub rail: FocusRail,
    /// Motion executor for everything that admits motion.
    pub rail_tx: Sender<RailRequest>,
    pub frames: FrameHub,
}
pub type AppState = Arc<AppStateInner>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(rail: FocusRail, rail_tx: Sender<RailRequest>, frames: FrameHub) -> Router {
    app_with_state(Arc::new(AppStateInner { rail, rail_tx, frames }))
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/position", get(get_status))
        .route("/api/move", post(move_handler))
        .route("/api/setzero", post(set_zero_handler))
        .route("/api/emergency", post(emergency_stop_handler))
        .route("/api/clearstop", post(clear_stop_handler))
        .route("/api/burst", post(burst_handler))
        .route("/api/burst/last", get(last_burst_handler))
        .route("/stream.mjpg", get(stream_handler))
        .with_state(state)
}

/// Sends a request to the motion executor and waits for its admission result.
async fn submit(
    state: &AppState,
    request: impl FnOnce(oneshot::Sender<Result<MotorStatus, RailError>>) -> RailRequest,
) -> Response {
    let (resp_tx, resp_rx) = oneshot::channel();
    if state.rail_tx.send(request(resp_tx)).await.is_err() {
        return rail_error(RailError::ExecutorUnavailable);
    }
    match resp_rx.await {
        Ok(Ok(status)) => Json(status).into_response(),
        Ok(Err(e)) => rail_error(e),
        Err(_) => rail_error(RailError::ExecutorUnavailable),
    }
}

/// Handler to get the current status snapshot of the rail.
async fn get_status(State(state): State<AppState>) -> Json<MotorStatus> {
    Json(state.rail.status())
}

/// Handler to jog the rail. Responds once the move is admitted.
async fn move_handler(
    State(state): State<AppState>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_error(&rejection.body_text(), StatusCode::BAD_REQUEST),
    };
    let command = match payload.into_command() {
        Ok(command) => command,
        Err(message) => return json_error(&message, StatusCode::BAD_REQUEST),
    };
    submit(&state, |respond_to| RailRequest::Jog { command, respond_to }).await
}

async fn set_zero_handler(State(state): State<AppState>) -> Response {
    submit(&state, |respond_to| RailRequest::SetZero { respond_to }).await
}

/// Handler to halt the rail. Bypasses the executor queue.
async fn emergency_stop_handler(State(state): State<AppState>) -> Json<MotorStatus> {
    Json(state.rail.emergency_stop())
}

async fn clear_stop_handler(State(state): State<AppState>) -> Response {
    submit(&state, |respond_to| RailRequest::ClearStop { respond_to }).await
}

/// Handler to start a focus-bracketing burst. Responds once the burst is
/// admitted; the run continues in the background.
async fn burst_handler(
    State(state): State<AppState>,
    payload: Result<Json<BurstRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_error(&rejection.body_text(), StatusCode::BAD_REQUEST),
    };
    let command = BurstCommand::from(payload);
    submit(&state, |respond_to| RailRequest::Burst { command, respond_to }).await
}

async fn last_burst_handler(State(state): State<AppState>) -> Response {
    match state.rail.last_burst() {
        Some(report) => Json(report).into_response(),
        None => json_error("No burst has run yet", StatusCode::NOT_FOUND),
    }
}

async fn stream_handler(State(state): State<AppState>) -> Response {
    mjpeg_response(state.frames.clone())
}
