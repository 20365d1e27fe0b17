use std::{error::Error, path::PathBuf, sync::Arc};

use batch_ingest::{
    clients::kairos::KairosClient,
    config::{IngestConfig, KairosConfig},
    pipeline::{handlers::kairos::KairosHandler, ingest::IngestPipeline, sources::nats::NatsSource},
};
use clap::{Args, Parser};
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Consume JSON metrics from NATS and write them to KairosDB in batches.
#[derive(Debug, Parser)]
#[command(name = "kairos", version, about, arg_required_else_help = true)]
struct AppArgs {
    #[clap(flatten)]
    nats_args: NatsArgs,

    /// JSON file with a `metrics` and a `kairos` section
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct NatsArgs {
    /// Url of the NATS server
    #[arg(long, default_value = "nats://localhost:4222")]
    nats_url: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    metrics: IngestConfig,
    kairos: KairosConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if let Err(e) = main_impl().await {
        error!("{e}");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_ingest=info,kairos=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = AppArgs::parse();

    let config: Config = serde_json::from_str(&std::fs::read_to_string(&args.config)?)?;
    config.metrics.validate()?;
    config.kairos.validate()?;

    let client = KairosClient::new(&config.kairos)?;
    info!(client_addr = %config.kairos.addr, "Built http client");
    let handler = KairosHandler::new(client);
    let kairos_stats = handler.stats();

    let source = NatsSource::connect(&args.nats_args.nats_url).await?;
    let pipeline =
        IngestPipeline::consume_in_batches(&source, &config.metrics, Arc::new(handler)).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    pipeline.shutdown().await;

    info!(
        successful_batches = kairos_stats.successful_batches(),
        failed_batches = kairos_stats.failed_batches(),
        failed_parsing = kairos_stats.failed_parsing(),
        "stopped"
    );

    Ok(())
}
