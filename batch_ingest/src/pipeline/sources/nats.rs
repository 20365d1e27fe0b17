use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use crate::message::{RawMessage, Subject};

use super::{Source, SourceError, Subscription};

impl From<async_nats::Message> for RawMessage {
    fn from(msg: async_nats::Message) -> Self {
        let async_nats::Message {
            subject,
            reply,
            payload,
            ..
        } = msg;

        RawMessage {
            subject: subject.to_string(),
            payload,
            reply: reply.map(|r| r.to_string()),
        }
    }
}

/// Consumes from a NATS server, using queue groups for load sharing.
#[derive(Debug, Clone)]
pub struct NatsSource {
    client: async_nats::Client,
}

impl NatsSource {
    pub async fn connect(url: &str) -> Result<NatsSource, SourceError> {
        let client = async_nats::connect(url).await?;
        info!(url, "connected to nats");
        Ok(NatsSource { client })
    }
}

#[async_trait]
impl Source for NatsSource {
    async fn subscribe(
        &self,
        subject: &Subject,
        group: Option<&str>,
    ) -> Result<Subscription, SourceError> {
        let subject = subject.to_string();
        let subscriber = match group.filter(|g| !g.is_empty()) {
            Some(group) => {
                self.client
                    .queue_subscribe(subject, group.to_string())
                    .await?
            }
            None => self.client.subscribe(subject).await?,
        };

        Ok(subscriber.map(RawMessage::from).boxed())
    }
}
