use std::sync::Arc;

use tracing::{error, info};

use crate::config::IngestConfig;

use super::{
    batching::BatchConfig,
    dispatch::{DispatchStats, Dispatcher},
    handlers::BatchHandler,
    sources::{buffered_subscribe, Source, SubscriptionHandle},
    workers::WorkerPool,
    PipelineError,
};

/// A subscription feeding a pool of batching workers.
pub struct IngestPipeline {
    subscription: SubscriptionHandle,
    pool: WorkerPool,
    dispatcher: Dispatcher,
}

impl IngestPipeline {
    /// Start the workers, then subscribe them to the configured subject.
    ///
    /// When the subscription cannot be registered, the workers are stopped
    /// before the error is returned.
    pub async fn consume_in_batches<S: Source + ?Sized>(
        source: &S,
        config: &IngestConfig,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let subject = config.subject()?;

        let (queue, shared) = async_channel::bounded(config.buffer_size);
        let dispatcher = Dispatcher::new(handler, DispatchStats::new());
        let pool = WorkerPool::start(
            shared,
            config.pool_size,
            BatchConfig::from(config),
            dispatcher.clone(),
        )?;

        let subscription =
            match buffered_subscribe(source, &subject, config.group(), queue).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    error!(%subject, "unable to subscribe: {e}");
                    pool.close();
                    pool.wait().await;
                    return Err(e.into());
                }
            };

        info!(
            group = subscription.group().unwrap_or_default(),
            %subject,
            pool_size = config.pool_size,
            "Subscription started"
        );

        Ok(IngestPipeline {
            subscription,
            pool,
            dispatcher,
        })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.dispatcher.stats().clone()
    }

    /// Messages received but not picked up by a worker yet.
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Wait for the workers to exit, which only happens once the shared
    /// queue is closed.
    pub async fn wait(&self) {
        self.pool.wait().await;
    }

    /// Consume until the bus ends the subscription, then shut down.
    pub async fn run(mut self) {
        self.subscription.finished().await;
        info!(subject = %self.subscription.subject(), "subscription finished");
        self.shutdown().await;
    }

    /// Stop consuming: unsubscribe, let the workers drain the shared queue,
    /// then wait for the batches already handed to the handler.
    pub async fn shutdown(self) {
        self.subscription.unsubscribe().await;
        info!("unsubscribed");

        self.pool.close();
        self.pool.wait().await;
        info!("stopped workers");

        self.dispatcher.drain().await;
        info!("stopped dispatcher");
    }
}
