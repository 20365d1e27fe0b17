use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use super::{
    batching::{batch::Batch, FlushReason},
    handlers::{BatchContext, BatchHandler},
};

/// Counters shared by every batcher of a pipeline. Only read for observability.
#[derive(Debug, Default)]
pub struct DispatchStats {
    inflight_batches: AtomicI64,
    sent_batches: AtomicU64,
    sent_messages: AtomicU64,
    dropped_messages: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Arc<DispatchStats> {
        Arc::new(DispatchStats::default())
    }

    /// Batches currently being handled.
    pub fn inflight_batches(&self) -> i64 {
        self.inflight_batches.load(Ordering::SeqCst)
    }

    /// Batches whose handler has returned.
    pub fn sent_batches(&self) -> u64 {
        self.sent_batches.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> u64 {
        self.sent_messages.load(Ordering::SeqCst)
    }

    /// Messages discarded with a partially filled batch at shutdown.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::SeqCst)
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.dropped_messages
            .fetch_add(count as u64, Ordering::SeqCst);
    }
}

/// Runs the batch handler on its own task for every flushed batch,
/// keeping the inflight and sent counters up to date.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn BatchHandler>,
    stats: Arc<DispatchStats>,
    task_tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn BatchHandler>, stats: Arc<DispatchStats>) -> Self {
        Dispatcher {
            handler,
            stats,
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub fn dispatch(&self, batch: Batch, reason: FlushReason, worker_id: usize) {
        let handler = self.handler.clone();
        let stats = self.stats.clone();
        let context = BatchContext {
            batch_id: batch.id(),
            reason,
            worker_id,
        };
        let span = info_span!(
            "batch",
            batch_id = context.batch_id,
            reason = %reason,
            worker_id
        );

        self.task_tracker.spawn(
            async move {
                let start = Instant::now();
                let batch_size = batch.len();
                let flying = stats.inflight_batches.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    inflight_batches = flying,
                    batch_size, "Starting to process batch"
                );

                handler.handle(batch, context).await;

                let flying = stats.inflight_batches.fetch_sub(1, Ordering::SeqCst) - 1;
                stats.sent_batches.fetch_add(1, Ordering::SeqCst);
                stats
                    .sent_messages
                    .fetch_add(batch_size as u64, Ordering::SeqCst);
                let dur = start.elapsed();
                info!(
                    dur = dur.as_nanos() as u64,
                    inflight_batches = flying,
                    "Finished batch in {dur:?}"
                );
            }
            .instrument(span),
        );
    }

    /// Number of dispatch tasks still running.
    pub fn pending(&self) -> usize {
        self.task_tracker.len()
    }

    /// Wait for every dispatched batch to be handled.
    pub async fn drain(&self) {
        self.task_tracker.close();
        if !self.task_tracker.is_empty() {
            warn!(
                pending = self.task_tracker.len(),
                "waiting for in-flight batches"
            );
        }
        self.task_tracker.wait().await;
        info!(
            sent_batches = self.stats.sent_batches(),
            dropped_messages = self.stats.dropped_messages(),
            "all batches handled"
        );
    }
}
