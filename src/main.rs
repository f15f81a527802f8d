use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use ra_mutex::{config::Args, console, network::Cluster};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter)),
        )
        .init();

    let timing = args.timing().context("invalid delay bounds")?;
    let cluster = Cluster::start(args.processes as usize, args.transport(), timing)
        .await
        .context("failed to start processes")?;
    info!(processes = cluster.len(), "processes running");

    let result = console::run(&cluster, BufReader::new(tokio::io::stdin())).await;
    cluster.shutdown().await;

    result.context("console failed")
}
