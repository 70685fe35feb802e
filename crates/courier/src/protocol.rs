//! Wire types for the messaging endpoint and directory lookup.
//!
//! Frames are JSON objects with camelCase keys. Inbound frames carry the
//! server-assigned `id` and `sentAt`; outbound frames omit both (the server
//! assigns them and returns the message as a later inbound echo).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant identifier assigned by the marketplace backend.
pub type UserId = i64;

/// A server-confirmed direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned unique id; the deduplication key.
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// Server-side send timestamp; the ordering key.
    pub sent_at: DateTime<Utc>,
}

/// An outbound message descriptor, sent as a single text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
}

/// A user profile from the directory service. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Normalized unordered pair of participant ids identifying one
/// direct-message thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey(UserId, UserId);

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    /// Whether the message belongs to this thread, in either direction.
    pub fn contains(&self, message: &ChatMessage) -> bool {
        *self == Self::new(message.sender_id, message.receiver_id)
    }
}
