use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credentials loaded from a JSON file or remote URL (camelCase keys).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileCredentials {
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
    pub region: Option<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<String>,
}

/// Response from the Kiro Desktop Auth refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<i64>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
}

/// Errors specific to the credential subsystem.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Refresh token is not set")]
    MissingRefreshToken,

    #[error("Response does not contain accessToken")]
    MissingAccessToken,

    #[error("Failed to obtain access token")]
    TokenUnavailable,

    #[error("HTTP error: {status} - {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParse(String),
}

impl AuthError {
    /// Whether the refresh flow may retry after this error.
    pub fn is_retriable(&self) -> bool {
        match self {
            AuthError::HttpStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            AuthError::Network(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_credentials_deserialize() {
        let json = r#"{
            "refreshToken": "rt_123",
            "accessToken": "at_456",
            "profileArn": "arn:aws:test",
            "region": "us-east-1",
            "expiresAt": "2026-02-10T19:54:16Z"
        }"#;
        let creds: FileCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("rt_123"));
        assert_eq!(creds.access_token.as_deref(), Some("at_456"));
        assert_eq!(creds.profile_arn.as_deref(), Some("arn:aws:test"));
        assert_eq!(creds.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_file_credentials_missing_fields() {
        let json = r#"{"refreshToken": "rt_only"}"#;
        let creds: FileCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("rt_only"));
        assert!(creds.access_token.is_none());
        assert!(creds.expires_at.is_none());
    }

    #[test]
    fn test_refresh_response_optional_fields() {
        let json = r#"{"accessToken": "at", "expiresIn": 1800}"#;
        let resp: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token.as_deref(), Some("at"));
        assert_eq!(resp.expires_in, Some(1800));
        assert!(resp.refresh_token.is_none());
        assert!(resp.profile_arn.is_none());
    }

    #[test]
    fn test_retriable_classification() {
        assert!(AuthError::HttpStatus { status: 429, body: String::new() }.is_retriable());
        assert!(AuthError::HttpStatus { status: 503, body: String::new() }.is_retriable());
        assert!(!AuthError::HttpStatus { status: 400, body: String::new() }.is_retriable());
        assert!(!AuthError::MissingRefreshToken.is_retriable());
    }

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::MissingRefreshToken;
        assert_eq!(err.to_string(), "Refresh token is not set");

        let err = AuthError::HttpStatus {
            status: 400,
            body: "bad request".to_string(),
        };
        assert!(err.to_string().contains("400"));
    }
}
