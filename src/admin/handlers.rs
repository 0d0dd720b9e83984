use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::rpc::{Command, Reply};
use crate::store::StoreStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    #[serde(flatten)]
    pub store: StoreStatus,
}

/// A refused request, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request<E: ToString>(message: E) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        store: state.store.status(),
    })
}

pub async fn get_groups(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.rpc.known_groups())
}

pub async fn post_rpc(
    State(state): State<AdminState>,
    body: Result<Json<Command>, JsonRejection>,
) -> Result<Json<Reply>, ApiError> {
    let Json(command) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let name = command.name();
    state.rpc.execute(command).map(Json).map_err(|e| {
        tracing::debug!(command = name, error = %e, "Admin command failed");
        ApiError::bad_request(e)
    })
}

pub async fn post_rpc_line(State(state): State<AdminState>, line: String) -> Result<Json<Reply>, ApiError> {
    state
        .rpc
        .execute_line(&line)
        .map(Json)
        .map_err(ApiError::bad_request)
}
