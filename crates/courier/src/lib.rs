//! Courier - real-time conversation synchronization client.
//!
//! Maintains a live WebSocket connection to the marketplace messaging
//! endpoint, keeps a deduplicated, time-ordered view of direct messages
//! across correspondents, and recovers transparently from connection loss.

pub mod client;
pub mod connection;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod settings;
pub mod store;
pub mod view;

pub use client::ChatClient;
pub use connection::{ChatConnection, ChatConnectionConfig, ConnectionState};
pub use directory::{DirectoryBackend, DirectoryCache, HttpDirectory};
pub use error::{DirectoryError, SendError};
pub use protocol::{ChatMessage, ConversationKey, OutboundMessage, UserId, UserProfile};
pub use settings::Settings;
pub use store::MessageStore;
pub use view::{ConversationView, DayGroup, Transport};
