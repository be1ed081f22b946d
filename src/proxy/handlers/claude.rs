// Anthropic /v1/messages handler.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::proxy::common::errors::{error_response, Dialect, GatewayError};
use crate::proxy::mappers::claude::{self, ClaudeRequest};
use crate::proxy::server::AppState;

use super::{resolve_credentials, respond, trace_id};

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let dialect = Dialect::Anthropic;
    let trace_id = trace_id();

    let manager = match resolve_credentials(&state, &headers, None).await {
        Ok(m) => m,
        Err(e) => return error_response(dialect, &e),
    };

    let request: ClaudeRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                dialect,
                &GatewayError::Validation(format!("invalid request body: {}", e)),
            )
        }
    };

    let canonical = match claude::to_canonical(&request) {
        Ok(c) => c,
        Err(e) => return error_response(dialect, &e),
    };

    respond(state, manager, canonical, dialect, trace_id).await
}
