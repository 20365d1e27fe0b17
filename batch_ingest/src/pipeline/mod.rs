use sources::SourceError;
use thiserror::Error;

use crate::config::ConfigError;

pub mod batching;
pub mod dispatch;
pub mod handlers;
pub mod ingest;
pub mod sources;
pub mod workers;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
