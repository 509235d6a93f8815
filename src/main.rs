use oauth_gateway::config::GatewayConfig;
use oauth_gateway::server;
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() {
    // Logging goes to stderr; `log` records from the library are bridged in.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("oauth-gateway starting");

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = server::start_server(config).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
