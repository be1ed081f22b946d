// Gateway configuration, loaded from the environment once at startup.

use std::str::FromStr;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub proxy_api_key: String,
    pub port: u16,
    pub refresh_token: Option<String>,
    pub profile_arn: Option<String>,
    pub region: String,
    pub creds_file: Option<String>,
    pub token_refresh_threshold: i64,
    pub max_retries: u32,
    pub base_retry_delay: f64,
    pub first_token_timeout: u64,
    pub first_token_max_retries: u32,
    pub stream_read_timeout: u64,
    pub non_stream_timeout: u64,
    pub slow_model_timeout_multiplier: f64,
    pub tool_description_max_length: usize,
    pub model_cache_ttl: u64,
    pub default_max_input_tokens: u64,
    pub rate_limit_per_minute: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_api_key: String::new(),
            port: 8080,
            refresh_token: None,
            profile_arn: None,
            region: "us-east-1".to_string(),
            creds_file: None,
            token_refresh_threshold: 600,
            max_retries: 3,
            base_retry_delay: 1.0,
            first_token_timeout: 120,
            first_token_max_retries: 3,
            stream_read_timeout: 300,
            non_stream_timeout: 900,
            slow_model_timeout_multiplier: 3.0,
            tool_description_max_length: 10_000,
            model_cache_ttl: 300,
            default_max_input_tokens: 200_000,
            rate_limit_per_minute: 0,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            proxy_api_key: std::env::var("PROXY_API_KEY").unwrap_or_default(),
            port: env_parse("PORT", defaults.port),
            refresh_token: env_non_empty("REFRESH_TOKEN"),
            profile_arn: env_non_empty("PROFILE_ARN"),
            region: env_non_empty("KIRO_REGION").unwrap_or(defaults.region),
            creds_file: env_non_empty("KIRO_CREDS_FILE"),
            token_refresh_threshold: env_parse(
                "TOKEN_REFRESH_THRESHOLD",
                defaults.token_refresh_threshold,
            ),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            base_retry_delay: env_parse("BASE_RETRY_DELAY", defaults.base_retry_delay),
            first_token_timeout: env_parse("FIRST_TOKEN_TIMEOUT", defaults.first_token_timeout),
            first_token_max_retries: env_parse(
                "FIRST_TOKEN_MAX_RETRIES",
                defaults.first_token_max_retries,
            ),
            stream_read_timeout: env_parse("STREAM_READ_TIMEOUT", defaults.stream_read_timeout),
            non_stream_timeout: env_parse("NON_STREAM_TIMEOUT", defaults.non_stream_timeout),
            slow_model_timeout_multiplier: env_parse(
                "SLOW_MODEL_TIMEOUT_MULTIPLIER",
                defaults.slow_model_timeout_multiplier,
            ),
            tool_description_max_length: env_parse(
                "TOOL_DESCRIPTION_MAX_LENGTH",
                defaults.tool_description_max_length,
            ),
            model_cache_ttl: env_parse("MODEL_CACHE_TTL", defaults.model_cache_ttl),
            default_max_input_tokens: env_parse(
                "DEFAULT_MAX_INPUT_TOKENS",
                defaults.default_max_input_tokens,
            ),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid value for {}: {:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
