use std::{error::Error, sync::Arc};

use batch_ingest::{
    config::IngestConfig,
    pipeline::{handlers::log::LogHandler, ingest::IngestPipeline, sources::memory::MemoryBus},
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Publish synthetic metrics on an in-memory bus and log the batches.
#[derive(Debug, Parser)]
#[command(name = "memory", version, about)]
struct AppArgs {
    /// Subject to consume
    #[arg(long, default_value = "metrics.>")]
    subject: String,

    /// Consumer group
    #[arg(long)]
    group: Option<String>,

    /// Capacity of the shared queue
    #[arg(long, default_value_t = 1000)]
    buffer_size: usize,

    /// Number of workers
    #[arg(long, default_value_t = 5)]
    pool_size: usize,

    /// Flush once a batch holds more than this many messages
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Flush period, in seconds
    #[arg(long, default_value_t = 1)]
    batch_timeout: u64,

    /// Number of messages to publish
    #[arg(long, default_value_t = 1000)]
    messages: usize,
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
                .unwrap_or_else(|_| "batch_ingest=info,memory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = AppArgs::parse();

    let config = IngestConfig {
        subject: args.subject,
        group: args.group,
        buffer_size: args.buffer_size,
        pool_size: args.pool_size,
        batch_size: args.batch_size,
        batch_timeout: args.batch_timeout,
        flush_on_shutdown: true,
    };

    let bus = MemoryBus::new();
    let pipeline = IngestPipeline::consume_in_batches(&bus, &config, Arc::new(LogHandler)).await?;
    let stats = pipeline.stats();

    for i in 0..args.messages {
        let payload = format!(
            r#"{{"name": "demo.counter", "value": {i}, "timestamp": "2024-01-01T00:00:00Z"}}"#
        );
        bus.publish(&format!("metrics.host{}", i % 4), payload).await?;
    }
    bus.close();

    pipeline.run().await;

    info!(
        sent_batches = stats.sent_batches(),
        sent_messages = stats.sent_messages(),
        dropped_messages = stats.dropped_messages(),
        "done"
    );

    Ok(())
}
