//! Connection manager for the live messaging channel.
//!
//! `ChatConnection` exclusively owns the WebSocket transport. A spawned
//! driver task runs the connect/reconnect loop; the rest of the crate talks
//! to it through channels: an outbound queue for sends, an inbound queue that
//! receives frames in exact wire order, and a watch channel publishing the
//! connectivity state.
//!
//! Reconnection is a fixed delay with no backoff and no retry cap - the
//! driver retries until `close()` is called. Owner-initiated close always
//! wins over a pending reconnect.

use std::fmt;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SendError;
use crate::protocol::{ChatMessage, OutboundMessage};

/// Connectivity state of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Configuration for a `ChatConnection`.
#[derive(Debug, Clone)]
pub struct ChatConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://host:port/ws/chat`.
    pub url: String,
    /// Opaque bearer credential, passed through as a query parameter.
    pub token: String,
    /// Fixed delay before the single scheduled reconnect attempt.
    pub reconnect_interval: Duration,
    /// Capacity of the outbound send queue.
    pub outbound_buffer: usize,
}

impl ChatConnectionConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect_interval: Duration::from_secs(3),
            outbound_buffer: 64,
        }
    }
}

/// Handle to the live channel. Cheap to share behind an `Arc`.
pub struct ChatConnection {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    _driver: JoinHandle<()>,
}

impl ChatConnection {
    /// Establish the connection. Spawns the driver task; at most one socket
    /// is ever live, and at most one connect attempt is ever outstanding.
    ///
    /// Inbound frames are forwarded to `inbound_tx` in the order they arrive
    /// on the wire. Malformed frames are dropped at this boundary.
    pub fn open(config: ChatConnectionConfig, inbound_tx: mpsc::Sender<ChatMessage>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(drive(config, state_tx, outbound_rx, inbound_tx, shutdown_rx));
        Self {
            outbound_tx,
            state_rx,
            shutdown_tx,
            _driver: driver,
        }
    }

    /// Current connectivity state, readable synchronously.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A watch receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queue an outbound message as a single frame.
    ///
    /// Rejected without any transport I/O when the channel is not open or
    /// the content trims to empty.
    pub fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotConnected);
        }
        if message.content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        self.outbound_tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
        })
    }

    /// Release the transport and suppress any pending reconnect. Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ChatConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChatConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConnection")
            .field("state", &self.state())
            .finish()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    /// Owner closed the connection or dropped the handle.
    Shutdown,
    /// Transport error or server-side close; reconnect.
    Lost(String),
}

async fn drive(
    config: ChatConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    inbound_tx: mpsc::Sender<ChatMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // The credential is opaque: percent-encode and pass through unchanged.
    let url = format!("{}?token={}", config.url, urlencoding::encode(&config.token));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        state_tx.send_replace(ConnectionState::Connecting);

        let attempt = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => Some(result),
            _ = shutdown_signalled(&mut shutdown_rx) => None,
        };
        let Some(result) = attempt else { break };

        match result {
            Ok((stream, _response)) => {
                state_tx.send_replace(ConnectionState::Open);
                info!(url = %config.url, "live channel open");
                let end =
                    run_session(stream, &mut outbound_rx, &inbound_tx, &mut shutdown_rx).await;
                state_tx.send_replace(ConnectionState::Closed);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => {
                        warn!(%reason, "live channel lost, reconnecting");
                    }
                }
            }
            Err(err) => {
                state_tx.send_replace(ConnectionState::Closed);
                warn!(error = %err, "connect failed, retrying");
            }
        }

        // Exactly one reconnect attempt after the fixed interval. close()
        // during the wait suppresses it.
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_interval) => {}
            _ = shutdown_signalled(&mut shutdown_rx) => break,
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
    debug!("connection driver stopped");
}

async fn run_session(
    stream: WsStream,
    outbound_rx: &mut mpsc::Receiver<OutboundMessage>,
    inbound_tx: &mpsc::Sender<ChatMessage>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read): (SplitSink<WsStream, Message>, SplitStream<WsStream>) =
        stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ChatMessage>(text.as_str()) {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping malformed inbound frame"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        return SessionEnd::Lost("failed to answer ping".to_string());
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Lost("closed by server".to_string());
                }
                // Binary, pong and raw frames are not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
            },
            queued = outbound_rx.recv() => match queued {
                Some(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(error = %err, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if let Err(err) = write.send(Message::text(json)).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                None => return SessionEnd::Shutdown,
            },
            _ = shutdown_signalled(shutdown_rx) => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

/// Resolves once the shutdown flag flips to true (or the handle is gone).
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
