//! Handlers translating HTTP requests into lock table operations.

use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use latch_locks::{AcquireOutcome, LockStatus, LockTable, ReleaseOutcome};
use latch_wire::{AcquireResponse, ErrorResponse, LockStatusResponse, LockView, ReleaseResponse};
use serde_json::Value;
use tracing::error;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn table_error_response<E: std::error::Error>(operation: &str, e: &E) -> Response {
    error!(operation, error = %e, "Lock table operation failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// Missing bodies and bodies that are not JSON read as empty, so they surface
// as a missing resource rather than a JSON error.
fn body_or_empty(payload: Result<Json<Value>, JsonRejection>) -> Value {
    payload.map_or(Value::Null, |Json(body)| body)
}

fn resource_from(body: &Value) -> Result<String, Response> {
    match body.get("resource").and_then(Value::as_str) {
        Some(resource) if !resource.is_empty() => Ok(resource.to_string()),
        _ => Err(error_response(StatusCode::BAD_REQUEST, "missing resource")),
    }
}

// Absent or null means the table default; anything but a positive integer is
// rejected.
fn ttl_from(body: &Value) -> Result<Option<Duration>, Response> {
    match body.get("ttl_ms") {
        None | Some(Value::Null) => Ok(None),
        Some(ttl_ms) => match ttl_ms.as_u64() {
            Some(ttl_ms) if ttl_ms > 0 => Ok(Some(Duration::from_millis(ttl_ms))),
            _ => Err(error_response(StatusCode::BAD_REQUEST, "invalid ttl_ms")),
        },
    }
}

/// Handler for `POST /lock/acquire`.
pub(crate) async fn acquire_handler<T>(
    State(table): State<T>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response
where
    T: LockTable,
{
    let body = body_or_empty(payload);

    let resource = match resource_from(&body) {
        Ok(resource) => resource,
        Err(response) => return response,
    };

    let ttl = match ttl_from(&body) {
        Ok(ttl) => ttl,
        Err(response) => return response,
    };

    match table.acquire(resource, ttl).await {
        Ok(AcquireOutcome::Acquired(lock_id)) => Json(AcquireResponse {
            lock_id: lock_id.get(),
        })
        .into_response(),
        Ok(AcquireOutcome::Conflict) => error_response(StatusCode::CONFLICT, "locked"),
        Err(e) => table_error_response("acquire", &e),
    }
}

/// Handler for `POST /lock/release`.
pub(crate) async fn release_handler<T>(
    State(table): State<T>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response
where
    T: LockTable,
{
    let body = body_or_empty(payload);

    let resource = match resource_from(&body) {
        Ok(resource) => resource,
        Err(response) => return response,
    };

    match table.release(resource).await {
        Ok(ReleaseOutcome::Released) => Json(ReleaseResponse { released: true }).into_response(),
        Ok(ReleaseOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ReleaseResponse { released: false }),
        )
            .into_response(),
        Err(e) => table_error_response("release", &e),
    }
}

/// Handler for `GET /locks`. Lists every stored entry, lapsed ones included.
pub(crate) async fn list_locks_handler<T>(State(table): State<T>) -> Response
where
    T: LockTable,
{
    match table.snapshot().await {
        Ok(entries) => Json(
            entries
                .into_iter()
                .map(|(resource, entry)| (resource, LockView::from(entry)))
                .collect::<HashMap<_, _>>(),
        )
        .into_response(),
        Err(e) => table_error_response("snapshot", &e),
    }
}

/// Handler for `GET /locks/{resource}`.
pub(crate) async fn lock_status_handler<T>(
    Path(resource): Path<String>,
    State(table): State<T>,
) -> Response
where
    T: LockTable,
{
    match table.check(resource.clone()).await {
        Ok(LockStatus::Free) => Json(LockStatusResponse::free(resource)).into_response(),
        Ok(LockStatus::Held(entry)) => {
            Json(LockStatusResponse::held(resource, entry)).into_response()
        }
        Err(e) => table_error_response("check", &e),
    }
}
