//! Client assembly.
//!
//! `ChatClient` is the explicitly owned composition root: it wires the
//! connection manager, the message store, the single ingest task and the
//! directory cache together. There is no process-wide state; dropping or
//! closing the client tears the connection down. The store is written only
//! by the ingest task, which applies frames in the exact order the wire
//! delivered them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{ChatConnection, ChatConnectionConfig, ConnectionState};
use crate::directory::{DirectoryBackend, DirectoryCache, HttpDirectory};
use crate::protocol::{ChatMessage, UserId};
use crate::settings::Settings;
use crate::store::MessageStore;
use crate::view::{ConversationView, Transport};

/// Buffer for the freshly-ingested message broadcast.
const EVENT_BUFFER_SIZE: usize = 256;

pub struct ChatClient {
    self_id: UserId,
    connection: Arc<ChatConnection>,
    store: Arc<RwLock<MessageStore>>,
    directory: Arc<DirectoryCache>,
    events_tx: broadcast::Sender<ChatMessage>,
    updates_tx: Arc<watch::Sender<u64>>,
    updates_rx: watch::Receiver<u64>,
    _ingest: JoinHandle<()>,
}

impl ChatClient {
    /// Connect to the messaging endpoint with the given bearer credential.
    pub fn connect(settings: &Settings, token: &str, self_id: UserId) -> Self {
        let directory = Arc::new(HttpDirectory::new(
            settings.directory.base_url.clone(),
            token,
            Duration::from_secs(settings.directory.request_timeout_secs),
        ));
        Self::with_directory(settings, token, self_id, directory)
    }

    /// Connect with a custom directory backend (tests, alternative lookup
    /// services).
    pub fn with_directory(
        settings: &Settings,
        token: &str,
        self_id: UserId,
        directory: Arc<dyn DirectoryBackend>,
    ) -> Self {
        let mut config = ChatConnectionConfig::new(settings.chat.ws_url.clone(), token);
        config.reconnect_interval = Duration::from_millis(settings.chat.reconnect_interval_ms);
        config.outbound_buffer = settings.chat.outbound_buffer;

        let (inbound_tx, mut inbound_rx) =
            mpsc::channel::<ChatMessage>(settings.chat.inbound_buffer);
        let connection = Arc::new(ChatConnection::open(config, inbound_tx));

        let store = Arc::new(RwLock::new(MessageStore::new()));
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let (updates_tx, updates_rx) = watch::channel(0u64);
        let updates_tx = Arc::new(updates_tx);

        // Single writer: frames are applied in wire order; the store re-sorts
        // by timestamp for display.
        let ingest_store = Arc::clone(&store);
        let ingest_updates = Arc::clone(&updates_tx);
        let ingest_events = events_tx.clone();
        let ingest = tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                let fresh = ingest_store.write().await.ingest(message.clone());
                if fresh {
                    ingest_updates.send_modify(|rev| *rev += 1);
                    let _ = ingest_events.send(message);
                }
            }
            debug!("ingest task stopped");
        });

        Self {
            self_id,
            connection,
            store,
            directory: Arc::new(DirectoryCache::new(directory)),
            events_tx,
            updates_tx,
            updates_rx,
            _ingest: ingest,
        }
    }

    pub fn self_id(&self) -> UserId {
        self.self_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// A view model over this client's store and connection.
    pub fn conversation_view(&self) -> ConversationView {
        ConversationView::new(
            self.self_id,
            Arc::clone(&self.store),
            Arc::clone(&self.connection) as Arc<dyn Transport>,
        )
    }

    pub fn store(&self) -> Arc<RwLock<MessageStore>> {
        Arc::clone(&self.store)
    }

    pub fn directory(&self) -> Arc<DirectoryCache> {
        Arc::clone(&self.directory)
    }

    /// Stream of freshly ingested (deduplicated) messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.events_tx.subscribe()
    }

    /// Revision counter bumped whenever the store changes; a UI awaits this
    /// to know when to re-read its projections.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates_rx.clone()
    }

    /// Merge a history page fetched out of band through the same dedup and
    /// ordering path as live frames. Overlap with the live stream is safe.
    pub async fn hydrate(&self, history: Vec<ChatMessage>) {
        let mut store = self.store.write().await;
        let mut fresh = false;
        for message in history {
            fresh |= store.ingest(message);
        }
        drop(store);
        if fresh {
            self.updates_tx.send_modify(|rev| *rev += 1);
        }
    }

    /// Close the live channel and suppress any pending reconnect. Directory
    /// fetches already in flight are left to finish; their results land in a
    /// cache nobody may read again, which is harmless.
    pub fn close(&self) {
        self.connection.close();
    }
}
