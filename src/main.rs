mod auth;
mod modules;
mod proxy;

use tracing::{error, info};

use crate::proxy::config::GatewayConfig;

#[tokio::main]
async fn main() {
    modules::logger::init_logger();

    let config = GatewayConfig::from_env();

    if config.proxy_api_key.is_empty() {
        error!("PROXY_API_KEY is required");
        std::process::exit(1);
    }
    if config.refresh_token.is_none() && config.creds_file.is_none() {
        error!("Either REFRESH_TOKEN or KIRO_CREDS_FILE must be configured");
        std::process::exit(1);
    }

    info!("--------------------------------------------------");
    info!("kiro-gateway {} starting", env!("CARGO_PKG_VERSION"));
    info!("Port: {}", config.port);
    info!("Region: {}", config.region);
    info!(
        "Credentials: {}",
        config
            .creds_file
            .as_deref()
            .unwrap_or("refresh token from environment")
    );
    info!("--------------------------------------------------");

    let port = config.port;
    let server = tokio::spawn(proxy::server::run(config));

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Server error on port {}: {}", port, e);
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
