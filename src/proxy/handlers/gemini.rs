// Gemini /v1beta/models/{model}:generateContent handler.
//
// The model name and action travel in the path segment; auth may arrive as
// a `key` query parameter.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::proxy::common::errors::{error_response, Dialect, GatewayError};
use crate::proxy::mappers::gemini::{self, GeminiRequest};
use crate::proxy::server::AppState;

use super::{resolve_credentials, respond, trace_id};

pub async fn generate_content(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let dialect = Dialect::Gemini;
    let trace_id = trace_id();

    let (model, action) = match model_action.split_once(':') {
        Some((model, action)) if !model.is_empty() => (model.to_string(), action.to_string()),
        _ => {
            return error_response(
                dialect,
                &GatewayError::Validation(format!(
                    "expected {{model}}:generateContent, got {:?}",
                    model_action
                )),
            )
        }
    };

    let stream = match action.as_str() {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_response(
                dialect,
                &GatewayError::Validation(format!("unsupported action: {}", other)),
            )
        }
    };

    let manager =
        match resolve_credentials(&state, &headers, query.get("key").map(|s| s.as_str())).await {
            Ok(m) => m,
            Err(e) => return error_response(dialect, &e),
        };

    let request: GeminiRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                dialect,
                &GatewayError::Validation(format!("invalid request body: {}", e)),
            )
        }
    };

    let canonical = match gemini::to_canonical(&request, &model, stream) {
        Ok(c) => c,
        Err(e) => return error_response(dialect, &e),
    };

    respond(state, manager, canonical, dialect, trace_id).await
}
