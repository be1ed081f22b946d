// Upstream HTTP client: signed generateAssistantResponse calls with
// adaptive timeouts, retry on 429/5xx, and forced token refresh on 403.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use tracing::{error, warn};

use crate::auth::CredentialManager;
use crate::proxy::common::errors::GatewayError;
use crate::proxy::common::model_mapping::is_slow_model;
use crate::proxy::config::GatewayConfig;

pub struct UpstreamClient {
    manager: Arc<CredentialManager>,
    http_client: reqwest::Client,
    config: Arc<GatewayConfig>,
}

impl UpstreamClient {
    pub fn new(
        manager: Arc<CredentialManager>,
        http_client: reqwest::Client,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            manager,
            http_client,
            config,
        }
    }

    /// Base timeout by mode, stretched for models known to be slow.
    pub fn request_timeout(&self, model: &str, streaming: bool) -> Duration {
        let base = if streaming {
            self.config.first_token_timeout
        } else {
            self.config.non_stream_timeout
        };
        let secs = if is_slow_model(model) {
            base as f64 * self.config.slow_model_timeout_multiplier
        } else {
            base as f64
        };
        Duration::from_secs_f64(secs)
    }

    /// Per-chunk read timeout for the translation pipeline.
    pub fn read_timeout(&self, model: &str) -> Duration {
        let secs = if is_slow_model(model) {
            self.config.stream_read_timeout as f64 * self.config.slow_model_timeout_multiplier
        } else {
            self.config.stream_read_timeout as f64
        };
        Duration::from_secs_f64(secs)
    }

    /// POST the payload to the upstream, retrying per policy:
    /// 403 → force refresh + immediate retry; 429/5xx → exponential backoff;
    /// non-streaming timeout → backoff retry; other 4xx returned unretried.
    pub async fn stream_request(
        &self,
        payload: &Value,
        model: &str,
        streaming: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/generateAssistantResponse", self.manager.api_host().await);
        let timeout = self.request_timeout(model, streaming);
        let max_retries = self.config.max_retries.max(1);
        let base_delay = Duration::from_secs_f64(self.config.base_retry_delay.max(0.0));

        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..max_retries {
            let token = self.manager.get_access_token().await?;
            let fingerprint = self.manager.fingerprint().await;

            let mut request = self
                .http_client
                .post(&url)
                .headers(upstream_headers(&token, &fingerprint))
                .json(payload);
            if !streaming {
                request = request.timeout(timeout);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let gw_error = if e.is_timeout() {
                        GatewayError::Timeout(format!(
                            "upstream request timed out after {:.0}s",
                            timeout.as_secs_f64()
                        ))
                    } else {
                        GatewayError::Upstream {
                            status: 502,
                            message: e.to_string(),
                        }
                    };
                    warn!(
                        "Upstream request error (attempt {}/{}): {}",
                        attempt + 1,
                        max_retries,
                        e
                    );
                    last_error = Some(gw_error);
                    if attempt + 1 < max_retries {
                        tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status.as_u16() == 403 {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "Upstream 403 (attempt {}/{}): {}, forcing token refresh",
                    attempt + 1,
                    max_retries,
                    body
                );
                if attempt + 1 < max_retries {
                    match self.manager.force_refresh().await {
                        Ok(_) => continue, // immediate retry, no backoff
                        Err(e) => {
                            error!("Forced token refresh after 403 failed: {}", e);
                            return Err(e.into());
                        }
                    }
                }
                last_error = Some(GatewayError::Upstream {
                    status: 403,
                    message: body,
                });
                break;
            }

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "Upstream {} (attempt {}/{}): {}",
                    status,
                    attempt + 1,
                    max_retries,
                    body
                );
                last_error = Some(if status.as_u16() == 429 {
                    GatewayError::RateLimit(body)
                } else {
                    GatewayError::Upstream {
                        status: status.as_u16(),
                        message: body,
                    }
                });
                if attempt + 1 < max_retries {
                    tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
                    continue;
                }
                break;
            }

            // Remaining 4xx are the caller's problem, unretried.
            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Upstream {
            status: 502,
            message: "upstream retries exhausted".into(),
        }))
    }
}

/// Convert a non-success response the client chose not to retry into the
/// canonical upstream error.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Upstream {
        status: status.as_u16(),
        message: body,
    })
}

fn upstream_headers(token: &str, fingerprint: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
        headers.insert(AUTHORIZATION, value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let ua = format!(
        "aws-sdk-js/1.0.27 ua/2.1 api/codewhispererstreaming#1.0.27 m/E KiroGateway-{}",
        fingerprint
    );
    if let Ok(value) = HeaderValue::from_str(&ua) {
        headers.insert(USER_AGENT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("aws-sdk-js/1.0.27 KiroGateway-{}", fingerprint))
    {
        headers.insert("x-amz-user-agent", value);
    }
    if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert("amz-sdk-invocation-id", value);
    }
    headers.insert("amz-sdk-request", HeaderValue::from_static("attempt=1; max=3"));

    headers
}
