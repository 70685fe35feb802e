//! Message store - single source of truth for all messages seen this session.
//!
//! The store is a plain single-writer structure: the client's ingest task is
//! the only writer, so the store itself carries no locking. Ordering is
//! maintained on insert, ascending by `sent_at` with ties kept in arrival
//! order, so every projection read is already sorted.

use std::collections::{HashMap, HashSet};

use crate::protocol::{ChatMessage, ConversationKey, UserId};

#[derive(Debug, Default)]
pub struct MessageStore {
    /// All messages, sorted ascending by `sent_at`, ties in arrival order.
    messages: Vec<ChatMessage>,
    /// Ids already ingested.
    seen: HashSet<i64>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message unless its id has been seen before.
    ///
    /// Returns `false` for duplicates (at-most-once application-level
    /// delivery over a transport that may redeliver). The insertion point is
    /// after all entries with an equal timestamp, so near-simultaneous
    /// messages never swap between reads.
    pub fn ingest(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(at, message);
        true
    }

    /// All messages exchanged between exactly these two participants, both
    /// directions, in timestamp order.
    pub fn conversation(&self, a: UserId, b: UserId) -> Vec<ChatMessage> {
        let key = ConversationKey::new(a, b);
        self.messages
            .iter()
            .filter(|m| key.contains(m))
            .cloned()
            .collect()
    }

    /// Distinct correspondents of `self_id`, most recent activity first.
    pub fn correspondents(&self, self_id: UserId) -> Vec<UserId> {
        let mut last_activity: HashMap<UserId, usize> = HashMap::new();
        for (index, message) in self.messages.iter().enumerate() {
            let partner = if message.sender_id == self_id {
                message.receiver_id
            } else if message.receiver_id == self_id {
                message.sender_id
            } else {
                continue;
            };
            last_activity.insert(partner, index);
        }
        let mut partners: Vec<(UserId, usize)> = last_activity.into_iter().collect();
        partners.sort_by(|a, b| b.1.cmp(&a.1));
        partners.into_iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
