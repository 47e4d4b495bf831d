use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use georoute_proxy::config::load_config;
use georoute_proxy::http::build_router;
use georoute_proxy::ProxyApp;

#[derive(Parser, Debug)]
#[command(name = "georoute-proxy", about = "Multi-region HTTP reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "PROXY_CONFIG", default_value = "./config.toml")]
    config: String,

    /// Overrides the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let app_state = Arc::new(ProxyApp::build(config));
    app_state.health_tracker.clone().spawn_background_loop();

    let port = app_state.config.port;
    let router = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "georoute-proxy listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
