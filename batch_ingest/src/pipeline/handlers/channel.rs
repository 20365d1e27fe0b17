use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::pipeline::batching::batch::Batch;

use super::{BatchContext, BatchHandler};

/// Forwards every batch to a channel, for a consumer living on another task.
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<(BatchContext, Batch)>,
}

impl ChannelHandler {
    pub fn new() -> (ChannelHandler, mpsc::UnboundedReceiver<(BatchContext, Batch)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelHandler { sender }, receiver)
    }
}

#[async_trait]
impl BatchHandler for ChannelHandler {
    async fn handle(&self, batch: Batch, context: BatchContext) {
        if self.sender.send((context, batch)).is_err() {
            warn!(batch_id = context.batch_id, "batch receiver is gone, dropping batch");
        }
    }
}
