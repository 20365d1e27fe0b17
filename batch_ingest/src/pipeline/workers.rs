use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use crate::{config::ConfigError, message::RawMessage};

use super::{
    batching::{batcher::Batcher, BatchConfig},
    dispatch::Dispatcher,
    PipelineError,
};

/// A fixed number of workers, all competing for the messages of one shared
/// queue. Each worker feeds its own batcher.
pub struct WorkerPool {
    queue: async_channel::Receiver<RawMessage>,
    task_tracker: TaskTracker,
    pool_size: usize,
}

impl WorkerPool {
    pub fn start(
        queue: async_channel::Receiver<RawMessage>,
        pool_size: usize,
        batch_config: BatchConfig,
        dispatcher: Dispatcher,
    ) -> Result<WorkerPool, PipelineError> {
        if pool_size == 0 {
            return Err(ConfigError::MustBePositive("pool_size").into());
        }
        // A batcher ticks on this period, which cannot be zero.
        if batch_config.flush_interval().is_zero() {
            return Err(ConfigError::MustBePositive("flush_interval").into());
        }

        let task_tracker = TaskTracker::new();
        for worker_id in 1..=pool_size {
            let queue = queue.clone();
            let batch_config = batch_config.clone();
            let dispatcher = dispatcher.clone();
            task_tracker.spawn(
                run_worker(worker_id, queue, batch_config, dispatcher)
                    .instrument(info_span!("worker", worker_id)),
            );
        }
        task_tracker.close();

        Ok(WorkerPool {
            queue,
            task_tracker,
            pool_size,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Messages waiting in the shared queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Close the shared queue. The workers exit once it is drained.
    pub fn close(&self) {
        if self.queue.close() {
            info!(remaining = self.queue.len(), "closed shared queue");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task_tracker.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }
}

async fn run_worker(
    worker_id: usize,
    queue: async_channel::Receiver<RawMessage>,
    batch_config: BatchConfig,
    dispatcher: Dispatcher,
) {
    info!("Starting worker");
    let stats = dispatcher.stats().clone();
    let batcher = Batcher::start(batch_config, dispatcher, worker_id);

    while let Ok(message) = queue.recv().await {
        if let Err(e) = batcher.send(message).await {
            warn!("{e}, stopping worker");
            stats.record_dropped(1);
            break;
        }
    }

    batcher.shutdown().await;
    info!("Worker stopped");
}
