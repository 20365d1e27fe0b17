use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::message::{RawMessage, Subject, SubjectError};

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("subject error: {0}")]
    Subject(#[from] SubjectError),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "nats")]
    #[error("nats connect error: {0}")]
    NatsConnect(#[from] async_nats::ConnectError),

    #[cfg(feature = "nats")]
    #[error("nats subscribe error: {0}")]
    NatsSubscribe(#[from] async_nats::SubscribeError),
}

/// The messages delivered to one subscriber.
pub type Subscription = BoxStream<'static, RawMessage>;

/// A publish/subscribe bus the pipeline can consume from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Register interest in a subject.
    ///
    /// With a group, each message is delivered to only one of the group
    /// members subscribed on the same subject. Without, every message on the
    /// subject is delivered.
    async fn subscribe(
        &self,
        subject: &Subject,
        group: Option<&str>,
    ) -> Result<Subscription, SourceError>;
}

/// Subscribe to `subject` and push every received message into `sink`.
///
/// Forwarding waits while `sink` is full, which stalls delivery from the bus
/// instead of buffering without bound. The sink is never closed here.
pub async fn buffered_subscribe<S: Source + ?Sized>(
    source: &S,
    subject: &Subject,
    group: Option<&str>,
    sink: async_channel::Sender<RawMessage>,
) -> Result<SubscriptionHandle, SourceError> {
    let mut subscription = source.subscribe(subject, group).await?;
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        let subject = subject.clone();
        async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => {
                            info!(%subject, "subscription ended");
                            break;
                        }
                    },
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sink.send(message) => if sent.is_err() {
                        debug!(%subject, "shared queue closed, stop forwarding");
                        break;
                    },
                }
            }
        }
    });

    Ok(SubscriptionHandle {
        subject: subject.clone(),
        group: group.map(str::to_string),
        cancel,
        task: Some(task),
    })
}

/// A running subscription bridge.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subject: Subject,
    group: Option<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Wait until the bus stops delivering to this subscription.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Stop delivery. Messages already in the shared queue stay there.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        self.finished().await;
        debug!(subject = %self.subject, "unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::sources::memory::MemoryBus;

    fn subject(name: &str) -> Subject {
        Subject::new(name).unwrap()
    }

    #[tokio::test]
    async fn forwards_messages_to_the_sink() {
        let bus = MemoryBus::new();
        let (sink, queue) = async_channel::bounded(10);
        let _handle = buffered_subscribe(&bus, &subject("metrics.>"), None, sink)
            .await
            .unwrap();

        bus.publish("metrics.cpu", "1").await.unwrap();
        bus.publish("metrics.mem", "2").await.unwrap();

        let first = queue.recv().await.unwrap();
        let second = queue.recv().await.unwrap();
        assert_eq!(first, RawMessage::new("metrics.cpu", "1"));
        assert_eq!(second, RawMessage::new("metrics.mem", "2"));
    }

    #[tokio::test]
    async fn registration_failure_is_reported() {
        let bus = MemoryBus::new();
        bus.close();
        let (sink, queue) = async_channel::bounded(10);

        let result = buffered_subscribe(&bus, &subject("metrics"), None, sink).await;

        assert!(matches!(result, Err(SourceError::Unavailable(_))));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn writes_block_when_the_sink_is_full() {
        let bus = MemoryBus::with_capacity(1);
        let (sink, queue) = async_channel::bounded(2);
        let _handle = buffered_subscribe(&bus, &subject("metrics"), None, sink)
            .await
            .unwrap();

        // Nobody consumes the queue: the queue, the subscription buffer and
        // the message held by the bridge are the only room there is.
        let mut published = 0;
        loop {
            let publish = bus.publish("metrics", format!("{published}"));
            match tokio::time::timeout(Duration::from_millis(100), publish).await {
                Ok(result) => {
                    result.unwrap();
                    published += 1;
                }
                Err(_elapsed) => break,
            }
            assert!(published <= 10, "publishing never blocked");
        }

        assert!(queue.is_full());
        assert_eq!(queue.len(), 2);
        assert_eq!(published, 4);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_without_closing_the_sink() {
        let bus = MemoryBus::new();
        let (sink, queue) = async_channel::bounded(10);
        let handle = buffered_subscribe(&bus, &subject("metrics"), None, sink.clone())
            .await
            .unwrap();

        bus.publish("metrics", "before").await.unwrap();
        assert_eq!(queue.recv().await.unwrap().payload, "before");

        handle.unsubscribe().await;
        bus.publish("metrics", "after").await.unwrap();

        assert!(!sink.is_closed());
        assert!(queue.is_empty());
    }
}
