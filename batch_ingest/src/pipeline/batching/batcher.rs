use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{message::RawMessage, pipeline::dispatch::Dispatcher};

use super::{batch::Batch, BatchConfig, FlushReason};

#[derive(Debug, Error)]
pub enum BatcherError {
    #[error("batcher of worker {0} has stopped")]
    Stopped(usize),
}

/// Accumulates messages into a batch and hands the batch to the dispatcher
/// once it is too large, or on every tick of the flush interval.
///
/// The batcher runs on its own task, which is the only owner of the current
/// batch. A flushed batch is moved to the dispatcher and a new one started
/// right away, without waiting for the handler.
pub struct Batcher {
    config: BatchConfig,
    dispatcher: Dispatcher,
    worker_id: usize,
    input: mpsc::Receiver<RawMessage>,
    cancel: CancellationToken,
    current: Batch,
    next_arrival: u64,
}

impl Batcher {
    /// Spawn a batcher, returning the handle used to feed and stop it.
    pub fn start(config: BatchConfig, dispatcher: Dispatcher, worker_id: usize) -> BatcherHandle {
        let (sender, receiver) = mpsc::channel(config.max_batch_size().max(1));
        let cancel = CancellationToken::new();

        let mut batcher = Batcher {
            config,
            dispatcher,
            worker_id,
            input: receiver,
            cancel: cancel.clone(),
            current: Batch::new(),
            next_arrival: 0,
        };

        let task = tokio::spawn(async move { batcher.run().await });

        BatcherHandle {
            worker_id,
            sender,
            cancel,
            task,
        }
    }

    async fn run(&mut self) {
        let period = self.config.flush_interval();
        // Ticks at a fixed period, whatever happened to the previous batch.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = self.input.recv() => match message {
                    Some(message) => self.add(message),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.current.is_empty() {
                        self.flush(FlushReason::Timeout);
                    }
                },
                _ = self.cancel.cancelled() => {
                    debug!(worker_id = self.worker_id, "Got shutdown signal");
                    self.input.close();
                    while let Some(message) = self.input.recv().await {
                        self.add(message);
                    }
                    break;
                },
            }
        }

        self.shutdown();
        debug!(worker_id = self.worker_id, "Shutdown batcher");
    }

    fn add(&mut self, message: RawMessage) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        if self.current.insert(arrival, message).is_some() {
            warn!(arrival, "replaced a message with the same arrival key");
        }

        if self.current.len() > self.config.max_batch_size() {
            self.flush(FlushReason::Size);
        }
    }

    fn flush(&mut self, reason: FlushReason) {
        let batch = std::mem::take(&mut self.current);
        self.dispatcher.dispatch(batch, reason, self.worker_id);
    }

    fn shutdown(&mut self) {
        if self.current.is_empty() {
            return;
        }

        if self.config.flush_on_shutdown() {
            self.flush(FlushReason::Shutdown);
        } else {
            let dropped = self.current.len();
            warn!(
                worker_id = self.worker_id,
                dropped, "dropping partially filled batch on shutdown"
            );
            self.dispatcher.stats().record_dropped(dropped);
            self.current = Batch::new();
        }
    }
}

/// The input and shutdown ports of a running [`Batcher`].
pub struct BatcherHandle {
    worker_id: usize,
    sender: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BatcherHandle {
    /// Feed a message, waiting while the batcher input is full.
    pub async fn send(&self, message: RawMessage) -> Result<(), BatcherError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| BatcherError::Stopped(self.worker_id))
    }

    /// Stop the batcher once the messages already sent have been added.
    ///
    /// This does not wait for the batches already dispatched.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(worker_id = self.worker_id, "batcher task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::Arc,
        time::Duration,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{mpsc::UnboundedReceiver, Semaphore};

    use super::*;
    use crate::pipeline::{
        dispatch::DispatchStats,
        handlers::{channel::ChannelHandler, BatchContext, BatchHandler},
    };

    const INTERVAL: Duration = Duration::from_secs(10);

    fn spawn_batcher(
        max_batch_size: usize,
        flush_on_shutdown: bool,
    ) -> (
        BatcherHandle,
        UnboundedReceiver<(BatchContext, Batch)>,
        Arc<DispatchStats>,
    ) {
        let (handler, batches) = ChannelHandler::new();
        let stats = DispatchStats::new();
        let dispatcher = Dispatcher::new(Arc::new(handler), stats.clone());
        let config = BatchConfig::new(max_batch_size, INTERVAL)
            .with_flush_on_shutdown(flush_on_shutdown);
        (Batcher::start(config, dispatcher, 1), batches, stats)
    }

    fn message(i: usize) -> RawMessage {
        RawMessage::new("metrics.test", format!("msg {i}"))
    }

    fn payloads(batch: Batch) -> Vec<Bytes> {
        batch.into_messages().into_iter().map(|m| m.payload).collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_one_message_past_the_batch_size() {
        let (batcher, mut batches, _) = spawn_batcher(3, false);

        for i in 0..3 {
            batcher.send(message(i)).await.unwrap();
        }
        settle().await;
        assert!(batches.try_recv().is_err(), "no flush at the batch size");

        batcher.send(message(3)).await.unwrap();
        let (context, batch) = batches.recv().await.unwrap();

        assert_eq!(context.reason, FlushReason::Size);
        assert_eq!(context.worker_id, 1);
        assert_eq!(batch.len(), 4);

        // The accumulator starts over from an empty batch
        batcher.send(message(4)).await.unwrap();
        settle().await;
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_timeout() {
        let (batcher, mut batches, _) = spawn_batcher(1000, false);

        batcher.send(message(0)).await.unwrap();
        settle().await;
        assert!(batches.try_recv().is_err());

        tokio::time::advance(INTERVAL).await;
        let (context, batch) = batches.recv().await.unwrap();

        assert_eq!(context.reason, FlushReason::Timeout);
        assert_eq!(payloads(batch), vec![Bytes::from("msg 0")]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batches_are_not_flushed() {
        let (_batcher, mut batches, stats) = spawn_batcher(1000, false);
        settle().await;

        tokio::time::advance(INTERVAL * 3).await;
        settle().await;

        assert!(batches.try_recv().is_err());
        assert_eq!(stats.sent_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_at_a_fixed_period() {
        let (batcher, mut batches, _) = spawn_batcher(1, false);
        let start = Instant::now();
        settle().await;

        // A size flush half way through the period does not reset the timer
        tokio::time::advance(INTERVAL / 2).await;
        batcher.send(message(0)).await.unwrap();
        batcher.send(message(1)).await.unwrap();
        let (context, _) = batches.recv().await.unwrap();
        assert_eq!(context.reason, FlushReason::Size);

        batcher.send(message(2)).await.unwrap();
        settle().await;
        tokio::time::advance(INTERVAL / 2).await;

        let (context, batch) = batches.recv().await.unwrap();
        assert_eq!(context.reason, FlushReason::Timeout);
        assert_eq!(payloads(batch), vec![Bytes::from("msg 2")]);
        assert_eq!(Instant::now() - start, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn same_instant_arrivals_are_all_kept() {
        let (batcher, mut batches, _) = spawn_batcher(1000, false);

        // Time is paused: every message arrives at the very same instant
        let before = Instant::now();
        for i in 0..5 {
            batcher.send(message(i)).await.unwrap();
        }
        settle().await;
        assert_eq!(Instant::now(), before);

        tokio::time::advance(INTERVAL).await;
        let (_, batch) = batches.recv().await.unwrap();

        let received: HashSet<Bytes> = payloads(batch).into_iter().collect();
        assert_eq!(received.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_dropped_on_shutdown() {
        let (batcher, mut batches, stats) = spawn_batcher(1000, false);

        batcher.send(message(0)).await.unwrap();
        batcher.send(message(1)).await.unwrap();
        batcher.shutdown().await;
        settle().await;

        assert!(batches.try_recv().is_err());
        assert_eq!(stats.dropped_messages(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_flushed_on_shutdown_when_configured() {
        let (batcher, mut batches, stats) = spawn_batcher(1000, true);

        batcher.send(message(0)).await.unwrap();
        batcher.send(message(1)).await.unwrap();
        batcher.shutdown().await;

        let (context, batch) = batches.recv().await.unwrap();
        assert_eq!(context.reason, FlushReason::Shutdown);
        assert_eq!(batch.len(), 2);
        assert_eq!(stats.dropped_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_fails_once_stopped() {
        let (batcher, _batches, _) = spawn_batcher(10, false);
        let sender = batcher.sender.clone();
        batcher.shutdown().await;

        assert!(sender.send(message(0)).await.is_err());
    }

    /// Holds every batch until a permit is released.
    struct BlockingHandler {
        gate: Arc<Semaphore>,
        handled: mpsc::UnboundedSender<usize>,
    }

    #[async_trait]
    impl BatchHandler for BlockingHandler {
        async fn handle(&self, batch: Batch, _context: BatchContext) {
            let _permit = self.gate.acquire().await.unwrap();
            self.handled.send(batch.len()).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_does_not_block_accumulation() {
        let gate = Arc::new(Semaphore::new(0));
        let (handled_tx, mut handled) = mpsc::unbounded_channel();
        let handler = BlockingHandler {
            gate: gate.clone(),
            handled: handled_tx,
        };
        let stats = DispatchStats::new();
        let dispatcher = Dispatcher::new(Arc::new(handler), stats.clone());
        let batcher = Batcher::start(BatchConfig::new(1, INTERVAL), dispatcher, 1);

        // First batch is stuck in the handler for a whole flush interval
        batcher.send(message(0)).await.unwrap();
        batcher.send(message(1)).await.unwrap();
        settle().await;
        assert_eq!(stats.inflight_batches(), 1);

        // ... while the next one keeps filling up and gets flushed too
        batcher.send(message(2)).await.unwrap();
        batcher.send(message(3)).await.unwrap();
        tokio::time::advance(INTERVAL).await;
        settle().await;
        assert_eq!(stats.inflight_batches(), 2);
        assert_eq!(stats.sent_batches(), 0);

        gate.add_permits(2);
        assert_eq!(handled.recv().await, Some(2));
        assert_eq!(handled.recv().await, Some(2));
    }
}
