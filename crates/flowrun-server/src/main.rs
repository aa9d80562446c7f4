//! flowrun-server binary — start the flow engine HTTP service.

use std::path::PathBuf;

use clap::Parser;
use flowrun_server::{serve, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "flowrun-server",
    about = "HTTP API for executing dataflow plans",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9847")]
    port: u16,

    /// Directory containing flow JSON files
    #[arg(long, default_value = "flows")]
    flows_dir: PathBuf,

    /// Directory containing composite definitions
    #[arg(long)]
    composites_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowrun=info,flowrun_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    serve(ServerConfig {
        host: cli.host,
        port: cli.port,
        flows_dir: cli.flows_dir,
        composites_dir: cli.composites_dir,
    })
    .await
}
