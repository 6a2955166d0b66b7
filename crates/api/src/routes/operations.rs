//! Operation discovery and invocation endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;
use crate::operations::OperationDescriptor;

/// GET /operations: lists every registered operation.
pub async fn list(State(state): State<AppState>) -> Json<Vec<OperationDescriptor>> {
    Json(state.registry.descriptors())
}

/// POST /operations/{name}: invokes one operation with a JSON body.
///
/// Business rejections are returned with status 200 and `"ok": false`.
#[tracing::instrument(skip(state, body))]
pub async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let input = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?
    };

    let payload = state.registry.invoke(&name, input).await?;
    Ok(Json(payload))
}
