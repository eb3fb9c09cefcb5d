//! Dispatch endpoint handler: the runtime-resolved operation surface.
//!
//! `POST /api/1.0/dev/downstream/{service}/{method}` routes a JSON payload
//! through the instrumented dispatch pipeline. Every failure path produces a
//! JSON [`ErrorBody`]; raw cause chains stay in the logs.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tower::ServiceExt;

use switchboard_core::ErrorBody;

use super::AppState;
use crate::dispatch::{DispatchError, DispatchRequest};

/// Handles `POST /api/1.0/dev/downstream/{service}/{method}`.
pub async fn dispatch_handler(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    payload: Result<Json<serde_json::Map<String, Value>>, JsonRejection>,
) -> Response {
    let _guard = state.shutdown.in_flight_guard();

    let Json(payload) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(rejection.status(), rejection.body_text());
        }
    };

    if service.trim().is_empty() || method.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "service and method names cannot be empty",
        );
    }

    let request = DispatchRequest::new(service, method, payload);
    match state.pipeline.clone().oneshot(request).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => dispatch_error_response(&err),
    }
}

fn dispatch_error_response(err: &DispatchError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.public_message())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody::new(
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        message,
    );
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
