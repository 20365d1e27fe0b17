use std::{
    collections::{btree_map, BTreeMap},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::message::RawMessage;

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Messages accumulated by one batcher, keyed by their arrival sequence number.
///
/// Sequence numbers are handed out by the owning batcher and never repeat,
/// so two messages arriving within the same clock tick are both kept.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    messages: BTreeMap<u64, RawMessage>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            messages: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Insert a message under its arrival key, returning the message
    /// previously stored under that key if any.
    pub fn insert(&mut self, arrival: u64, message: RawMessage) -> Option<RawMessage> {
        self.messages.insert(arrival, message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &RawMessage> {
        self.messages.values()
    }

    pub fn into_messages(self) -> Vec<RawMessage> {
        self.messages.into_values().collect()
    }
}

impl Default for Batch {
    fn default() -> Self {
        Batch::new()
    }
}

impl IntoIterator for Batch {
    type Item = (u64, RawMessage);
    type IntoIter = btree_map::IntoIter<u64, RawMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_get_distinct_ids() {
        let first = Batch::new();
        let second = Batch::new();

        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn messages_come_out_in_arrival_order() {
        let mut batch = Batch::new();
        batch.insert(7, RawMessage::new("a", "second"));
        batch.insert(3, RawMessage::new("a", "first"));

        let payloads: Vec<_> = batch
            .into_messages()
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(payloads, vec!["first", "second"]);
    }
}
