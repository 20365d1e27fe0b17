use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::message::{RawMessage, Subject};

use super::{Source, SourceError, Subscription};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Subscriber {
    pattern: Subject,
    sender: mpsc::Sender<RawMessage>,
}

#[derive(Debug)]
struct Group {
    pattern: Subject,
    members: Vec<mpsc::Sender<RawMessage>>,
    next: usize,
}

impl Group {
    /// Pick the next live member, round robin.
    fn next_member(&mut self) -> Option<mpsc::Sender<RawMessage>> {
        self.members.retain(|m| !m.is_closed());
        if self.members.is_empty() {
            return None;
        }
        let member = self.members[self.next % self.members.len()].clone();
        self.next = self.next.wrapping_add(1);
        Some(member)
    }
}

#[derive(Debug, Default)]
struct BusState {
    closed: bool,
    subscribers: Vec<Subscriber>,
    groups: HashMap<(String, String), Group>,
}

/// An in-process bus, with subject wildcards and consumer groups.
///
/// Publishing waits for room in every receiving subscription, so a subscriber
/// that stops consuming eventually stalls its publishers.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryBus {
    pub fn new() -> MemoryBus {
        MemoryBus::default()
    }

    /// A bus whose subscriptions buffer at most `capacity` messages each.
    pub fn with_capacity(capacity: usize) -> MemoryBus {
        MemoryBus {
            state: Arc::new(Mutex::new(BusState::default())),
            capacity: capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        // The state is left consistent by every critical section
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse new subscriptions and end the existing ones.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.subscribers.clear();
        state.groups.clear();
        info!("memory bus closed");
    }

    /// Publish a message, returning the number of subscriptions it was delivered to.
    pub async fn publish<B>(&self, subject: &str, payload: B) -> Result<usize, SourceError>
    where
        B: Into<Bytes>,
    {
        self.publish_message(RawMessage::new(subject, payload)).await
    }

    pub async fn publish_message(&self, message: RawMessage) -> Result<usize, SourceError> {
        Subject::new_concrete(&message.subject)?;

        let targets = {
            let mut state = self.state();
            if state.closed {
                return Err(SourceError::Unavailable("memory bus is closed".into()));
            }

            state.subscribers.retain(|s| !s.sender.is_closed());
            let mut targets: Vec<_> = state
                .subscribers
                .iter()
                .filter(|s| s.pattern.matches(&message.subject))
                .map(|s| s.sender.clone())
                .collect();

            state.groups.retain(|_, g| {
                g.members.retain(|m| !m.is_closed());
                !g.members.is_empty()
            });
            targets.extend(
                state
                    .groups
                    .values_mut()
                    .filter(|g| g.pattern.matches(&message.subject))
                    .filter_map(Group::next_member),
            );
            targets
        };

        let mut delivered = 0;
        for target in targets {
            if target.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        debug!(subject = %message.subject, delivered, "published");
        Ok(delivered)
    }
}

#[async_trait]
impl Source for MemoryBus {
    async fn subscribe(
        &self,
        subject: &Subject,
        group: Option<&str>,
    ) -> Result<Subscription, SourceError> {
        let (sender, receiver) = mpsc::channel(self.capacity);

        let mut state = self.state();
        if state.closed {
            return Err(SourceError::Unavailable("memory bus is closed".into()));
        }

        match group.filter(|g| !g.is_empty()) {
            Some(group) => {
                state
                    .groups
                    .entry((subject.as_str().to_string(), group.to_string()))
                    .or_insert_with(|| Group {
                        pattern: subject.clone(),
                        members: vec![],
                        next: 0,
                    })
                    .members
                    .push(sender);
            }
            None => state.subscribers.push(Subscriber {
                pattern: subject.clone(),
                sender,
            }),
        }

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn subject(name: &str) -> Subject {
        Subject::new(name).unwrap()
    }

    async fn next(subscription: &mut Subscription) -> Option<RawMessage> {
        tokio::time::timeout(Duration::from_millis(100), subscription.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn exclusive_subscribers_receive_every_message() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe(&subject("metrics.*"), None).await.unwrap();
        let mut second = bus.subscribe(&subject("metrics.cpu"), None).await.unwrap();

        assert_eq!(bus.publish("metrics.cpu", "42").await.unwrap(), 2);

        assert_eq!(next(&mut first).await, Some(RawMessage::new("metrics.cpu", "42")));
        assert_eq!(next(&mut second).await, Some(RawMessage::new("metrics.cpu", "42")));
    }

    #[tokio::test]
    async fn unmatched_subjects_are_not_delivered() {
        let bus = MemoryBus::new();
        let mut subscription = bus.subscribe(&subject("metrics.cpu"), None).await.unwrap();

        assert_eq!(bus.publish("metrics.mem", "42").await.unwrap(), 0);
        assert_eq!(next(&mut subscription).await, None);
    }

    #[tokio::test]
    async fn group_members_share_the_messages() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe(&subject("metrics"), Some("workers")).await.unwrap();
        let mut second = bus.subscribe(&subject("metrics"), Some("workers")).await.unwrap();

        for i in 0..4 {
            assert_eq!(bus.publish("metrics", format!("{i}")).await.unwrap(), 1);
        }

        let mut received = 0;
        while next(&mut first).await.is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
        while next(&mut second).await.is_some() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn groups_and_exclusive_subscribers_both_receive() {
        let bus = MemoryBus::new();
        let _member = bus.subscribe(&subject("metrics"), Some("workers")).await.unwrap();
        let _other = bus.subscribe(&subject("metrics"), Some("audit")).await.unwrap();
        let _exclusive = bus.subscribe(&subject("metrics"), None).await.unwrap();

        assert_eq!(bus.publish("metrics", "42").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let bus = MemoryBus::new();
        let subscription = bus.subscribe(&subject("metrics"), Some("workers")).await.unwrap();
        let mut remaining = bus.subscribe(&subject("metrics"), Some("workers")).await.unwrap();
        drop(subscription);

        for i in 0..3 {
            assert_eq!(bus.publish("metrics", format!("{i}")).await.unwrap(), 1);
        }
        for _ in 0..3 {
            assert!(next(&mut remaining).await.is_some());
        }
    }

    #[tokio::test]
    async fn cannot_publish_on_a_wildcard() {
        let bus = MemoryBus::new();
        assert!(matches!(
            bus.publish("metrics.*", "42").await,
            Err(SourceError::Subject(_))
        ));
    }

    #[tokio::test]
    async fn closed_bus_refuses_subscriptions() {
        let bus = MemoryBus::new();
        let mut subscription = bus.subscribe(&subject("metrics"), None).await.unwrap();
        bus.close();

        assert!(matches!(
            bus.subscribe(&subject("metrics"), None).await,
            Err(SourceError::Unavailable(_))
        ));
        assert_eq!(next(&mut subscription).await, None);
    }
}
