use async_trait::async_trait;
use tracing::info;

use crate::pipeline::batching::batch::Batch;

use super::{BatchContext, BatchHandler};

pub struct LogHandler;

#[async_trait]
impl BatchHandler for LogHandler
where
    Self: Send + Sync,
{
    async fn handle(&self, batch: Batch, context: BatchContext) {
        for message in batch.messages() {
            info!(
                subject = %message.subject,
                size = message.payload.len(),
                "received {:?}",
                String::from_utf8_lossy(&message.payload)
            );
        }
        info!(
            batch_size = batch.len(),
            worker_id = context.worker_id,
            "handled batch {}",
            context.batch_id
        );
    }
}
