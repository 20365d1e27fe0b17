use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    clients::kairos::KairosClient,
    conversions::metric::{Point, RawMetric},
    pipeline::batching::batch::Batch,
};

use super::{BatchContext, BatchHandler};

/// What happened to the metrics handed to a [`KairosHandler`].
#[derive(Debug, Default)]
pub struct KairosStats {
    incoming_metrics: AtomicU64,
    outgoing_points: AtomicU64,
    failed_parsing: AtomicU64,
    successful_batches: AtomicU64,
    failed_batches: AtomicU64,
}

impl KairosStats {
    pub fn incoming_metrics(&self) -> u64 {
        self.incoming_metrics.load(Ordering::SeqCst)
    }

    pub fn outgoing_points(&self) -> u64 {
        self.outgoing_points.load(Ordering::SeqCst)
    }

    pub fn failed_parsing(&self) -> u64 {
        self.failed_parsing.load(Ordering::SeqCst)
    }

    pub fn successful_batches(&self) -> u64 {
        self.successful_batches.load(Ordering::SeqCst)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::SeqCst)
    }
}

/// Parses every message of a batch as a JSON metric and writes the
/// resulting points to KairosDB in a single request.
///
/// Messages that are not valid metrics are skipped; they never fail the batch.
pub struct KairosHandler {
    client: KairosClient,
    stats: Arc<KairosStats>,
}

impl KairosHandler {
    pub fn new(client: KairosClient) -> KairosHandler {
        KairosHandler {
            client,
            stats: Arc::new(KairosStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<KairosStats> {
        self.stats.clone()
    }

    fn parse(&self, batch: &Batch) -> (Vec<Point>, usize) {
        let mut points = Vec::with_capacity(batch.len());
        let mut failed = 0;

        for message in batch.messages() {
            match RawMetric::try_from(message) {
                Ok(metric) => points.push(Point::from(metric)),
                Err(e) => {
                    warn!(subject = %message.subject, "Failed to unmarshal metric, skipping it: {e}");
                    failed += 1;
                }
            }
        }

        (points, failed)
    }
}

#[async_trait]
impl BatchHandler for KairosHandler {
    async fn handle(&self, batch: Batch, _context: BatchContext) {
        let start = Instant::now();

        let (points, parse_failed) = self.parse(&batch);
        let parsing_dur = start.elapsed();
        debug!(
            parsing_dur = parsing_dur.as_nanos() as u64,
            "Parsed batch, sending it to kairos"
        );

        self.stats
            .incoming_metrics
            .fetch_add(batch.len() as u64, Ordering::SeqCst);
        self.stats
            .failed_parsing
            .fetch_add(parse_failed as u64, Ordering::SeqCst);

        if points.is_empty() {
            warn!(
                incoming_batch_size = batch.len(),
                failed_parsing = parse_failed,
                "No valid metric in batch, nothing to write"
            );
            return;
        }

        let write_start = Instant::now();
        match self.client.add_points(&points).await {
            Ok(()) => {
                self.stats.successful_batches.fetch_add(1, Ordering::SeqCst);
                self.stats
                    .outgoing_points
                    .fetch_add(points.len() as u64, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Failed to write batch to kairos: {e}");
                self.stats.failed_batches.fetch_add(1, Ordering::SeqCst);
            }
        }
        let write_dur = write_start.elapsed();

        let total_dur = start.elapsed();
        info!(
            incoming_batch_size = batch.len(),
            failed_parsing = parse_failed,
            outgoing_batch_size = points.len(),
            parsing_dur = parsing_dur.as_nanos() as u64,
            write_dur = write_dur.as_nanos() as u64,
            total_dur = total_dur.as_nanos() as u64,
            "Finished writing batch in {total_dur:?}"
        );
    }
}
