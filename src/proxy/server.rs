// Gateway HTTP surface: state, routes, and startup.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::cache::DEFAULT_CACHE_CAPACITY;
use crate::auth::{CredentialCache, CredentialManager, RetryPolicy};
use crate::proxy::common::model_mapping::list_models;
use crate::proxy::config::GatewayConfig;
use crate::proxy::handlers;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub credentials: Arc<CredentialManager>,
    pub tenant_cache: Arc<CredentialCache>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn from_config(config: GatewayConfig) -> Self {
        let retry_policy = RetryPolicy {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_secs_f64(config.base_retry_delay.max(0.0)),
        };

        let credentials = Arc::new(CredentialManager::new(
            config.refresh_token.clone(),
            config.profile_arn.clone(),
            Some(config.region.clone()),
            config.creds_file.clone(),
            Some(config.token_refresh_threshold),
            retry_policy,
        ));

        let tenant_cache = Arc::new(CredentialCache::new(
            DEFAULT_CACHE_CAPACITY,
            Some(config.token_refresh_threshold),
            retry_policy,
        ));

        // One shared client; per-request timeouts are applied at call sites
        // because streamed bodies must be allowed to outlive any fixed
        // request deadline.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default();

        Self {
            config: Arc::new(config),
            credentials,
            tenant_cache,
            http_client,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handlers::openai::chat_completions))
        .route("/v1/messages", post(handlers::claude::messages))
        .route(
            "/v1beta/models/:model_action",
            post(handlers::gemini::generate_content),
        )
        .route("/v1/models", get(list_models_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .with_state(state)
}

pub async fn run(config: GatewayConfig) -> Result<(), std::io::Error> {
    if config.rate_limit_per_minute > 0 {
        warn!(
            "RATE_LIMIT_PER_MINUTE={} is recognized but not enforced",
            config.rate_limit_per_minute
        );
    }

    let port = config.port;
    let state = AppState::from_config(config);

    if let Err(e) = state.credentials.load_remote_credentials().await {
        warn!("Failed to load remote credentials: {}", e);
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Gateway listening on 0.0.0.0:{}", port);

    axum::serve(listener, app).await
}

async fn list_models_handler() -> impl IntoResponse {
    let data: Vec<_> = list_models()
        .into_iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "created": 1706745600,
                "owned_by": "kiro-gateway"
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "tenant_managers": state.tenant_cache.len().await,
        "region": state.config.region,
    }))
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "name": "kiro-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/v1/chat/completions",
            "/v1/messages",
            "/v1beta/models/{model}:generateContent",
            "/v1beta/models/{model}:streamGenerateContent",
            "/v1/models"
        ]
    }))
}
