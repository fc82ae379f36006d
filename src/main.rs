use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archgraph::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archgraph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info {
            model,
            scale,
            depth_multiple,
            width_multiple,
            nc,
            policy,
        } => {
            archgraph::cli::info(model, scale, depth_multiple, width_multiple, nc, policy).await?;
        }
        Commands::Check { models, policy } => {
            archgraph::cli::check(models, policy).await?;
        }
        Commands::List { verbose } => {
            archgraph::cli::list(verbose).await?;
        }
        Commands::Fmt {
            model,
            json,
            output,
        } => {
            archgraph::cli::fmt(model, json, output).await?;
        }
    }

    Ok(())
}
