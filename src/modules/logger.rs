// Logger initialization
// Filter level comes from LOG_LEVEL (falls back to RUST_LOG, then "info").

use tracing_subscriber::EnvFilter;

pub fn init_logger() {
    let level = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
