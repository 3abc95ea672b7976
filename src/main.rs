use bucket_directory::config::{Args, NodeConfig};
use bucket_directory::node::BucketNode;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = NodeConfig::load(&args)?;

    tracing::info!("Starting node on {}", config.bind_addr());
    let node = BucketNode::start(config).await?;
    tracing::info!("Node ID: {}", node.name());
    tracing::info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.shutdown().await;

    Ok(())
}
