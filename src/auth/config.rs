use sha2::{Digest, Sha256};

/// Time before token expiration when refresh is needed (in seconds).
/// Default 10 minutes - refresh token in advance to avoid errors.
pub const DEFAULT_TOKEN_REFRESH_THRESHOLD: i64 = 600;

/// Safety skew subtracted from the issued expiry (in seconds).
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Returns the Kiro Desktop Auth token refresh URL for the given region.
///
/// Example: `get_refresh_url("us-east-1")` →
/// `"https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"`
pub fn get_refresh_url(region: &str) -> String {
    format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", region)
}

/// Returns the Kiro API host for the given region.
///
/// Example: `get_api_host("us-east-1")` →
/// `"https://codewhisperer.us-east-1.amazonaws.com"`
pub fn get_api_host(region: &str) -> String {
    format!("https://codewhisperer.{}.amazonaws.com", region)
}

/// Returns the Q API host for the given region.
///
/// Example: `get_q_host("us-east-1")` →
/// `"https://q.us-east-1.amazonaws.com"`
pub fn get_q_host(region: &str) -> String {
    format!("https://q.{}.amazonaws.com", region)
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Machine fingerprint: SHA256("{hostname}-{username}-kiro-gateway").
///
/// Used only as an opaque suffix in outbound user-agent strings.
pub fn get_machine_fingerprint() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let unique_string = format!("{}-{}-kiro-gateway", hostname, username);
    let hash = Sha256::digest(unique_string.as_bytes());
    bytes_to_hex(&hash)
}
