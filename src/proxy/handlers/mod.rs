// Route handlers: authenticate, normalize to canonical, build the upstream
// payload, and run the translation pipeline.

pub mod claude;
pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rand::Rng;
use tracing::{error, info};

use crate::auth::CredentialManager;
use crate::proxy::common::errors::{error_response, Dialect, GatewayError};
use crate::proxy::mappers::canonical::CanonicalRequest;
use crate::proxy::mappers::tools::extract_long_descriptions;
use crate::proxy::server::AppState;
use crate::proxy::streaming::retry::{stream_with_retry, SseStream};
use crate::proxy::streaming::{self, StreamContext, StreamError};
use crate::proxy::tokenizer::estimate_request_tokens;
use crate::proxy::upstream::client::{ensure_success, UpstreamClient};
use crate::proxy::upstream::payload::build_upstream_payload;
use crate::proxy::upstream::utils::conversation_id;

pub(crate) fn trace_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Pull the client token from `Authorization: Bearer`, `x-api-key`, or the
/// `key` query parameter, in that order.
pub(crate) fn extract_client_token(headers: &HeaderMap, query_key: Option<&str>) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }
    query_key
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Two token shapes are accepted: the bare gateway key (global credentials)
/// or `key:refresh_token` (per-tenant credentials from the cache).
pub(crate) async fn resolve_credentials(
    state: &AppState,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<Arc<CredentialManager>, GatewayError> {
    let token = extract_client_token(headers, query_key)
        .ok_or_else(|| GatewayError::Authentication("missing API key".into()))?;

    let api_key = &state.config.proxy_api_key;
    if api_key.is_empty() {
        return Err(GatewayError::Authentication(
            "gateway has no PROXY_API_KEY configured".into(),
        ));
    }

    if token == *api_key {
        return Ok(state.credentials.clone());
    }

    if let Some(refresh_token) = token.strip_prefix(&format!("{}:", api_key)) {
        if !refresh_token.is_empty() {
            return Ok(state
                .tenant_cache
                .get_or_create(
                    refresh_token,
                    Some(state.config.region.clone()),
                    state.config.profile_arn.clone(),
                )
                .await);
        }
    }

    Err(GatewayError::Authentication("invalid API key".into()))
}

/// Shared tail of every dialect handler: tool-description extraction,
/// payload construction, retry-wrapped streaming, and the dialect response.
pub(crate) async fn respond(
    state: AppState,
    manager: Arc<CredentialManager>,
    mut canonical: CanonicalRequest,
    dialect: Dialect,
    trace_id: String,
) -> Response {
    let config = state.config.clone();

    let (tools, tool_docs) = extract_long_descriptions(
        std::mem::take(&mut canonical.tools),
        config.tool_description_max_length,
    );
    canonical.tools = tools;
    let mut system_prompt = canonical.system_prompt.clone();
    if !tool_docs.is_empty() {
        system_prompt.push_str(&tool_docs);
    }

    let conversation_id = conversation_id(&canonical.messages);
    let profile_arn = manager.profile_arn().await;

    let payload = Arc::new(build_upstream_payload(
        &canonical,
        &system_prompt,
        &conversation_id,
        profile_arn.as_deref(),
    ));

    let prompt_estimate = estimate_request_tokens(&canonical);
    let client = Arc::new(UpstreamClient::new(
        manager,
        state.http_client.clone(),
        config.clone(),
    ));

    let ctx = StreamContext {
        model: canonical.model.clone(),
        first_token_timeout: client.request_timeout(&canonical.model, true),
        read_timeout: client.read_timeout(&canonical.model),
        max_input_tokens: config.default_max_input_tokens,
        prompt_estimate,
    };

    info!(
        "[{}] {:?} request | model: {} | stream: {} | messages: {} | tools: {}",
        trace_id,
        dialect,
        canonical.model,
        canonical.stream,
        canonical.messages.len(),
        canonical.tools.len()
    );

    let streaming_mode = canonical.stream;
    let model = canonical.model.clone();

    let make_stream = {
        let client = client.clone();
        let payload = payload.clone();
        let ctx = ctx.clone();
        let model = model.clone();
        move || {
            let client = client.clone();
            let payload = payload.clone();
            let ctx = ctx.clone();
            let model = model.clone();
            async move {
                let response = client.stream_request(&payload, &model, streaming_mode).await?;
                let response = ensure_success(response).await?;
                let stream: SseStream = match dialect {
                    Dialect::OpenAi => streaming::openai::stream_to_openai(response, ctx).boxed(),
                    Dialect::Anthropic => {
                        streaming::claude::stream_to_anthropic(response, ctx).boxed()
                    }
                    Dialect::Gemini => streaming::gemini::stream_to_gemini(response, ctx).boxed(),
                };
                Ok(stream)
            }
        }
    };

    let stream = match stream_with_retry(
        make_stream,
        config.first_token_max_retries,
        Duration::from_secs(1),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            error!("[{}] Upstream request failed: {}", trace_id, e);
            return error_response(dialect, &e);
        }
    };

    if streaming_mode {
        return sse_response(stream, dialect);
    }

    let collected = match dialect {
        Dialect::OpenAi => streaming::openai::collect(stream, &model).await,
        Dialect::Anthropic => streaming::claude::collect(stream, &model).await,
        Dialect::Gemini => streaming::gemini::collect(stream).await,
    };
    match collected {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!("[{}] Collect failed: {}", trace_id, e);
            error_response(dialect, &e)
        }
    }
}

/// Flush SSE frames into the response body. A mid-stream error becomes one
/// dialect-shaped error frame and the stream ends (no [DONE] after it).
fn sse_response<S>(stream: S, dialect: Dialect) -> Response
where
    S: Stream<Item = Result<String, StreamError>> + Send + 'static,
{
    let body_stream = stream.scan(false, move |errored, item| {
        if *errored {
            return futures::future::ready(None);
        }
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => {
                *errored = true;
                streaming::error_frame(dialect, &GatewayError::from(e))
            }
        };
        futures::future::ready(Some(Ok::<Bytes, std::convert::Infallible>(Bytes::from(frame))))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
