use std::{fmt, time::Duration};

use crate::config::IngestConfig;

pub mod batch;
pub mod batcher;

/// Why a batch was detached from its batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The batch grew past the configured batch size.
    Size,
    /// The flush interval ticked while the batch was not empty.
    Timeout,
    /// The batcher was shut down with `flush_on_shutdown` set.
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    max_batch_size: usize,
    flush_interval: Duration,
    flush_on_shutdown: bool,
}

impl BatchConfig {
    pub fn new(max_batch_size: usize, flush_interval: Duration) -> BatchConfig {
        BatchConfig {
            max_batch_size,
            flush_interval,
            flush_on_shutdown: false,
        }
    }

    pub fn with_flush_on_shutdown(self, flush_on_shutdown: bool) -> Self {
        Self {
            flush_on_shutdown,
            ..self
        }
    }

    /// A batch is flushed when it holds strictly more messages than this.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn flush_on_shutdown(&self) -> bool {
        self.flush_on_shutdown
    }
}

impl From<&IngestConfig> for BatchConfig {
    fn from(config: &IngestConfig) -> Self {
        BatchConfig::new(config.batch_size, config.flush_interval())
            .with_flush_on_shutdown(config.flush_on_shutdown)
    }
}
