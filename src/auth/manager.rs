use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::{
    get_api_host, get_machine_fingerprint, get_q_host, get_refresh_url,
    DEFAULT_TOKEN_REFRESH_THRESHOLD, EXPIRY_SKEW_SECS,
};
use super::types::{AuthError, FileCredentials, RefreshResponse};

/// Retry policy for the token refresh flow.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Where credentials are loaded from (and, for files, persisted back to).
#[derive(Debug, Clone)]
enum CredsSource {
    File(PathBuf),
    Url(String),
}

struct Inner {
    refresh_token: Option<String>,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    profile_arn: Option<String>,
    region: String,
    creds_source: Option<CredsSource>,
    refresh_url: String,
    api_host: String,
    q_host: String,
    fingerprint: String,
    refresh_threshold: i64,
    retry_policy: RetryPolicy,
    http_client: Client,
}

/// Manages one refresh-token credential: mints and caches access tokens,
/// refreshes ahead of expiry, and persists refreshed credentials.
///
/// The whole state sits behind a single async mutex. Holding the lock across
/// the refresh HTTP call is the single-flight guard: the first caller runs
/// the refresh while every concurrent caller blocks on the lock and then
/// observes the freshly minted token.
pub struct CredentialManager {
    inner: Mutex<Inner>,
}

impl Inner {
    fn is_token_expiring_soon(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(expires) => {
                expires <= Utc::now() + chrono::Duration::seconds(self.refresh_threshold)
            }
        }
    }

    fn load_credentials_from_str(&mut self, content: &str, origin: &str) {
        let data: FileCredentials = match serde_json::from_str(content) {
            Ok(d) => d,
            Err(e) => {
                warn!("Error parsing credentials from {}: {}", origin, e);
                return;
            }
        };

        if data.refresh_token.is_some() {
            self.refresh_token = data.refresh_token;
        }
        if data.access_token.is_some() {
            self.access_token = data.access_token;
        }
        if data.profile_arn.is_some() {
            self.profile_arn = data.profile_arn;
        }
        if let Some(ref region) = data.region {
            self.region = region.clone();
            self.refresh_url = get_refresh_url(&self.region);
            self.api_host = get_api_host(&self.region);
            self.q_host = get_q_host(&self.region);
            info!(
                "Region updated from credentials: region={}, api_host={}",
                self.region, self.api_host
            );
        }
        if let Some(ref expires_str) = data.expires_at {
            match parse_expires_at(expires_str) {
                Ok(dt) => self.expires_at = Some(dt),
                Err(e) => warn!("Failed to parse expiresAt: {}", e),
            }
        }
        info!("Credentials loaded from {}", origin);
    }

    fn load_credentials_from_file(&mut self, path: &PathBuf) {
        if !path.exists() {
            warn!("Credentials file not found: {}", path.display());
            return;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => self.load_credentials_from_str(&content, &path.display().to_string()),
            Err(e) => warn!("Error reading credentials file: {}", e),
        }
    }

    /// Persist refreshed credentials back to the file, preserving keys this
    /// gateway does not own. Write-temp-then-rename so a crash mid-write
    /// never leaves a torn file.
    fn save_credentials_to_file(&self) {
        let path = match self.creds_source {
            Some(CredsSource::File(ref p)) => p,
            _ => return,
        };

        let mut existing: Value = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));

        if let Value::Object(ref mut map) = existing {
            if let Some(ref token) = self.access_token {
                map.insert("accessToken".to_string(), Value::String(token.clone()));
            }
            if let Some(ref token) = self.refresh_token {
                map.insert("refreshToken".to_string(), Value::String(token.clone()));
            }
            if let Some(ref dt) = self.expires_at {
                map.insert("expiresAt".to_string(), Value::String(dt.to_rfc3339()));
            }
            if let Some(ref arn) = self.profile_arn {
                map.insert("profileArn".to_string(), Value::String(arn.clone()));
            }
        }

        let json_str = match serde_json::to_string_pretty(&existing) {
            Ok(s) => s,
            Err(e) => {
                warn!("Error serializing credentials: {}", e);
                return;
            }
        };

        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &json_str) {
            warn!("Error writing credentials temp file: {}", e);
            return;
        }
        match std::fs::rename(&tmp_path, path) {
            Ok(()) => debug!("Credentials saved to {}", path.display()),
            Err(e) => warn!("Error renaming credentials file: {}", e),
        }
    }

    async fn refresh_once(&mut self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .ok_or(AuthError::MissingRefreshToken)?
            .clone();

        let payload = serde_json::json!({ "refreshToken": refresh_token });
        let user_agent = format!("KiroGateway/{}-{}", env!("CARGO_PKG_VERSION"), self.fingerprint);

        let response = self
            .http_client
            .post(&self.refresh_url)
            .header("Content-Type", "application/json")
            .header("User-Agent", &user_agent)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data: RefreshResponse = response.json().await?;
        let new_access_token = data.access_token.ok_or(AuthError::MissingAccessToken)?;
        let expires_in = data.expires_in.unwrap_or(3600);

        self.access_token = Some(new_access_token);
        if let Some(rt) = data.refresh_token {
            self.refresh_token = Some(rt);
        }
        if let Some(arn) = data.profile_arn {
            self.profile_arn = Some(arn);
        }
        self.expires_at = Some(Utc::now() + chrono::Duration::seconds(expires_in - EXPIRY_SKEW_SECS));

        info!(
            "Token refreshed, expires: {}",
            self.expires_at.map(|d| d.to_rfc3339()).unwrap_or_default()
        );

        self.save_credentials_to_file();
        Ok(())
    }

    /// Run the refresh with exponential backoff on retriable failures
    /// (HTTP 429/5xx and transport errors).
    async fn refresh_with_backoff(&mut self) -> Result<(), AuthError> {
        let policy = self.retry_policy;
        let mut attempt: u32 = 0;
        loop {
            match self.refresh_once().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retriable() && attempt + 1 < policy.max_retries => {
                    let delay = policy.base_delay * 2u32.pow(attempt);
                    warn!(
                        "Token refresh failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        policy.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl CredentialManager {
    pub fn new(
        refresh_token: Option<String>,
        profile_arn: Option<String>,
        region: Option<String>,
        creds_file: Option<String>,
        refresh_threshold: Option<i64>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let region = region.unwrap_or_else(|| "us-east-1".to_string());
        let refresh_url = get_refresh_url(&region);
        let api_host = get_api_host(&region);
        let q_host = get_q_host(&region);
        let fingerprint = get_machine_fingerprint();

        let creds_source = creds_file.as_deref().map(|raw| {
            if raw.starts_with("http://") || raw.starts_with("https://") {
                CredsSource::Url(raw.to_string())
            } else {
                CredsSource::File(expand_tilde(raw))
            }
        });

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let mut inner = Inner {
            refresh_token,
            access_token: None,
            expires_at: None,
            profile_arn,
            region,
            creds_source: creds_source.clone(),
            refresh_url,
            api_host,
            q_host,
            fingerprint,
            refresh_threshold: refresh_threshold.unwrap_or(DEFAULT_TOKEN_REFRESH_THRESHOLD),
            retry_policy,
            http_client,
        };

        if let Some(CredsSource::File(ref path)) = creds_source {
            let path = path.clone();
            inner.load_credentials_from_file(&path);
        }

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Fetch remote credentials once. Applies only when the manager was
    /// configured with an `http(s)://` credentials URL; such credentials are
    /// never persisted back.
    pub async fn load_remote_credentials(&self) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        let url = match inner.creds_source {
            Some(CredsSource::Url(ref u)) => u.clone(),
            _ => return Ok(()),
        };
        let response = inner.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let content = response.text().await?;
        inner.load_credentials_from_str(&content, &url);
        Ok(())
    }

    /// Return a valid access token, refreshing first when none is cached or
    /// the cached one is inside the refresh threshold.
    pub async fn get_access_token(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;

        if inner.access_token.is_some() && !inner.is_token_expiring_soon() {
            return Ok(inner.access_token.clone().unwrap());
        }

        inner.refresh_with_backoff().await?;
        inner.access_token.clone().ok_or(AuthError::TokenUnavailable)
    }

    /// Refresh unconditionally (used after an upstream 403), still under the
    /// single-flight guard.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;
        inner.refresh_with_backoff().await?;
        inner.access_token.clone().ok_or(AuthError::TokenUnavailable)
    }

    pub async fn region(&self) -> String {
        self.inner.lock().await.region.clone()
    }

    pub async fn api_host(&self) -> String {
        self.inner.lock().await.api_host.clone()
    }

    pub async fn q_host(&self) -> String {
        self.inner.lock().await.q_host.clone()
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.inner.lock().await.profile_arn.clone()
    }

    pub async fn fingerprint(&self) -> String {
        self.inner.lock().await.fingerprint.clone()
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.expires_at
    }

    pub async fn current_refresh_token(&self) -> Option<String> {
        self.inner.lock().await.refresh_token.clone()
    }

    #[cfg(test)]
    pub(crate) async fn set_endpoints_for_tests(&self, refresh_url: String, api_host: String) {
        let mut inner = self.inner.lock().await;
        inner.refresh_url = refresh_url;
        inner.api_host = api_host;
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.trim_start_matches("~/"));
        }
    }
    PathBuf::from(path)
}

fn parse_expires_at(s: &str) -> Result<DateTime<Utc>, AuthError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }
    Err(AuthError::DateParse(format!("Cannot parse date: {}", s)))
}
