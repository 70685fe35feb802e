//! Error types.
//!
//! Nothing in this crate is fatal: transport failures are absorbed by the
//! reconnect loop and only show up as connectivity state, and the errors
//! below are precondition rejections or retriable lookup failures.

use thiserror::Error;

use crate::protocol::UserId;

/// A send that was rejected before any transport I/O happened.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is not open")]
    NotConnected,

    #[error("message content is empty")]
    EmptyContent,

    #[error("no correspondent selected")]
    NoCorrespondent,

    #[error("outbound queue is full")]
    QueueFull,
}

/// Directory lookup failure. The id stays unresolved and may be retried.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("directory returned status {status} for user {id}")]
    Status { id: UserId, status: u16 },
}
