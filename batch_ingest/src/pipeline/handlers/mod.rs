pub mod channel;
pub mod kairos;
pub mod log;

use async_trait::async_trait;

use super::batching::{batch::Batch, FlushReason};

/// Where a batch comes from, passed along with the batch to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    pub batch_id: u64,
    pub reason: FlushReason,
    pub worker_id: usize,
}

/// Receives every flushed batch, exactly once.
///
/// Handlers run on their own task, concurrently with the accumulation of the
/// next batch and with other invocations of the same handler. Failures are
/// the handler's business: nothing is retried and the outcome is not reported
/// back to the pipeline.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: Batch, context: BatchContext);
}
