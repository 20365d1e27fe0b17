use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{config::KairosConfig, conversions::metric::Point};

const DATAPOINTS_PATH: &str = "/api/v1/datapoints";

#[derive(Debug, Error)]
pub enum KairosClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("kairos responded {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl KairosClientError {
    /// Server errors and transport failures may go away on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            KairosClientError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            KairosClientError::Status { status, .. } => status.is_server_error(),
        }
    }
}

/// Writes data points to KairosDB over its REST API.
#[derive(Debug, Clone)]
pub struct KairosClient {
    client: reqwest::Client,
    endpoint: String,
    max_retries: usize,
    min_delay: Duration,
}

impl KairosClient {
    pub fn new(config: &KairosConfig) -> Result<KairosClient, KairosClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(KairosClient {
            client,
            endpoint: format!("{}{DATAPOINTS_PATH}", config.addr.trim_end_matches('/')),
            max_retries: config.max_retries,
            min_delay: Duration::from_millis(100),
        })
    }

    pub fn with_min_delay(self, min_delay: Duration) -> Self {
        Self { min_delay, ..self }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send all the points in one request, retrying transient failures.
    pub async fn add_points(&self, points: &[Point]) -> Result<(), KairosClientError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.max_retries);

        (|| self.post_points(points))
            .retry(backoff)
            .when(KairosClientError::is_retryable)
            .notify(|e, dur| warn!("Failed to write points, retrying in {dur:?}: {e}"))
            .await
    }

    async fn post_points(&self, points: &[Point]) -> Result<(), KairosClientError> {
        let response = self.client.post(&self.endpoint).json(points).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KairosClientError::Status { status, body });
        }

        debug!(points = points.len(), %status, "wrote points");
        Ok(())
    }
}
