use clap::Parser;
use codelab_server::{Engine, ServerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "codelab")]
#[command(about = "Codelab - sandboxed code execution service", long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Disable permissive CORS (enabled by default for browser editors).
    #[arg(long)]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        enable_cors: !cli.no_cors,
        ..Default::default()
    };

    let engine = Engine::new(config);
    engine.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
