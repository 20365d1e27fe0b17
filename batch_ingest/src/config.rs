use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::message::{Subject, SubjectError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("subject error: {0}")]
    Subject(#[from] SubjectError),

    #[error("must provide an address for kairos")]
    MissingKairosAddr,

    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_buffer_size() -> usize {
    1000
}

fn default_pool_size() -> usize {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout() -> u64 {
    1
}

/// Settings of the batching pipeline consuming one subject.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub subject: String,

    /// Consumer group; when set the subscription load-shares with the other members.
    #[serde(default)]
    pub group: Option<String>,

    /// Capacity of the queue shared by all the workers.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// A batch is flushed once it holds more than this many messages.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush period, in seconds.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: u64,

    #[serde(default)]
    pub flush_on_shutdown: bool,
}

impl IngestConfig {
    pub fn new(subject: impl Into<String>) -> IngestConfig {
        IngestConfig {
            subject: subject.into(),
            group: None,
            buffer_size: default_buffer_size(),
            pool_size: default_pool_size(),
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            flush_on_shutdown: false,
        }
    }

    pub fn from_json(json: &str) -> Result<IngestConfig, ConfigError> {
        let config: IngestConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::MustBePositive("buffer_size"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::MustBePositive("pool_size"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::MustBePositive("batch_size"));
        }
        if self.batch_timeout == 0 {
            return Err(ConfigError::MustBePositive("batch_timeout"));
        }
        self.subject()?;
        Ok(())
    }

    pub fn subject(&self) -> Result<Subject, ConfigError> {
        Ok(Subject::new(&self.subject)?)
    }

    /// The consumer group, with an empty name meaning no group.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.batch_timeout)
    }
}

fn default_kairos_timeout() -> u64 {
    10
}

fn default_kairos_retries() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct KairosConfig {
    pub addr: String,

    /// Request timeout, in seconds.
    #[serde(default = "default_kairos_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_kairos_retries")]
    pub max_retries: usize,
}

impl KairosConfig {
    pub fn new(addr: impl Into<String>) -> KairosConfig {
        KairosConfig {
            addr: addr.into(),
            timeout_secs: default_kairos_timeout(),
            max_retries: default_kairos_retries(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::MissingKairosAddr);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::MustBePositive("timeout_secs"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
