//! Conversation view model.
//!
//! Turns the flat ordered message sequence for one correspondent into the
//! day-grouped structure a UI renders, and mediates sends through the
//! connection. Day labels are always derived at call time against the local
//! clock, never stored.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::RwLock;

use crate::connection::ChatConnection;
use crate::error::SendError;
use crate::protocol::{ChatMessage, OutboundMessage, UserId};
use crate::store::MessageStore;

/// Seam between the view model and the live channel. Lets tests swap the
/// real connection for a recording fake.
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, message: OutboundMessage) -> Result<(), SendError>;
}

impl Transport for ChatConnection {
    fn is_open(&self) -> bool {
        ChatConnection::is_open(self)
    }

    fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        ChatConnection::send(self, message)
    }
}

/// A contiguous run of messages sharing one calendar day (local time).
#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub label: String,
    pub date: NaiveDate,
    pub messages: Vec<ChatMessage>,
}

/// View model for the conversation with one selected correspondent.
pub struct ConversationView {
    self_id: UserId,
    store: Arc<RwLock<MessageStore>>,
    transport: Arc<dyn Transport>,
    active: Option<UserId>,
}

impl ConversationView {
    pub fn new(
        self_id: UserId,
        store: Arc<RwLock<MessageStore>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            self_id,
            store,
            transport,
            active: None,
        }
    }

    /// Set the active conversation partition. Pure state change, no I/O.
    pub fn select_correspondent(&mut self, user_id: UserId) {
        self.active = Some(user_id);
    }

    pub fn clear_correspondent(&mut self) {
        self.active = None;
    }

    pub fn active_correspondent(&self) -> Option<UserId> {
        self.active
    }

    /// The ordered projection for the active conversation.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        match self.active {
            Some(partner) => self.store.read().await.conversation(self.self_id, partner),
            None => Vec::new(),
        }
    }

    /// The active conversation partitioned into day groups, labelled
    /// relative to the local clock right now.
    pub async fn day_groups(&self) -> Vec<DayGroup> {
        let messages = self.messages().await;
        group_by_day(&messages, Local::now().date_naive())
    }

    /// Send `content` to the active correspondent.
    ///
    /// Rejected with no transport I/O when the content trims to empty, no
    /// correspondent is selected, or the channel is not open. There is no
    /// optimistic local echo: the message appears only once the server echo
    /// arrives with an assigned id.
    pub fn send_to_active(&self, content: &str) -> Result<(), SendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }
        let Some(receiver_id) = self.active else {
            return Err(SendError::NoCorrespondent);
        };
        if !self.transport.is_open() {
            return Err(SendError::NotConnected);
        }
        self.transport.send(OutboundMessage {
            sender_id: self.self_id,
            receiver_id,
            content: content.to_string(),
        })
    }
}

/// Partition an ordered message sequence into contiguous calendar-day runs,
/// judged in local time against `today`.
pub fn group_by_day(messages: &[ChatMessage], today: NaiveDate) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for message in messages {
        let date = message.sent_at.with_timezone(&Local).date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message.clone()),
            _ => groups.push(DayGroup {
                label: day_label(date, today),
                date,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%B %-d, %Y").to_string()
    }
}
