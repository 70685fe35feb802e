//! Live-channel integration tests against an in-process WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use courier::{
    ChatClient, ChatConnection, ChatConnectionConfig, ConnectionState, OutboundMessage, SendError,
    Settings,
};

fn test_config(port: u16, interval_ms: u64) -> ChatConnectionConfig {
    let mut config =
        ChatConnectionConfig::new(format!("ws://127.0.0.1:{port}/ws/chat"), "test-token");
    config.reconnect_interval = Duration::from_millis(interval_ms);
    config
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want}"));
}

#[tokio::test]
async fn opens_and_delivers_outbound_frame() {
    let (listener, port) = bind().await;
    let (frame_tx, frame_rx) = oneshot::channel::<String>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let mut frame_tx = Some(frame_tx);
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if let Some(tx) = frame_tx.take() {
                    let _ = tx.send(text.to_string());
                }
                break;
            }
        }
    });

    let (inbound_tx, _inbound_rx) = mpsc::channel(16);
    let conn = ChatConnection::open(test_config(port, 100), inbound_tx);
    let mut state = conn.watch_state();
    wait_for_state(&mut state, ConnectionState::Open).await;

    // Blank content is rejected before any transport I/O.
    assert_eq!(
        conn.send(OutboundMessage {
            sender_id: 1,
            receiver_id: 42,
            content: "   ".to_string(),
        }),
        Err(SendError::EmptyContent)
    );

    conn.send(OutboundMessage {
        sender_id: 1,
        receiver_id: 42,
        content: "hi".to_string(),
    })
    .unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(5), frame_rx)
        .await
        .expect("no frame within timeout")
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["senderId"], 1);
    assert_eq!(value["receiverId"], 42);
    assert_eq!(value["content"], "hi");
    assert!(value.get("id").is_none());
    conn.close();
}

#[tokio::test]
async fn send_rejected_before_open() {
    // Nothing listens on the discard port; the connection never opens.
    let (inbound_tx, _inbound_rx) = mpsc::channel(16);
    let conn = ChatConnection::open(test_config(9, 50), inbound_tx);

    let result = conn.send(OutboundMessage {
        sender_id: 1,
        receiver_id: 42,
        content: "hi".to_string(),
    });
    assert_eq!(result, Err(SendError::NotConnected));
    conn.close();
}

#[tokio::test]
async fn malformed_inbound_frame_is_dropped() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::text("this is not a message frame"))
            .await
            .unwrap();
        let valid = serde_json::json!({
            "id": 5,
            "senderId": 2,
            "receiverId": 1,
            "content": "hello",
            "sentAt": "2026-08-27T10:00:00Z"
        });
        ws.send(Message::text(valid.to_string())).await.unwrap();
        // Keep the connection up so the client does not reconnect mid-test.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
    let conn = ChatConnection::open(test_config(port, 100), inbound_tx);

    let message = tokio::time::timeout(Duration::from_secs(5), inbound_rx.recv())
        .await
        .expect("no inbound message within timeout")
        .expect("inbound channel closed");
    assert_eq!(message.id, 5);
    assert_eq!(message.content, "hello");
    conn.close();
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (listener, port) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = Arc::clone(&accepts);
    tokio::spawn(async move {
        // First connection is dropped right after the handshake; the second
        // stays up.
        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (inbound_tx, _inbound_rx) = mpsc::channel(16);
    let conn = ChatConnection::open(test_config(port, 100), inbound_tx);

    // Recovers to Open on its own after one reconnect interval.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if accepts.load(Ordering::SeqCst) >= 2 && conn.state() == ConnectionState::Open {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection never recovered"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    conn.close();
}

#[tokio::test]
async fn close_suppresses_pending_reconnect() {
    let (listener, port) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            // Drop every connection immediately after the handshake.
            let _ = accept_async(stream).await;
        }
    });

    let (inbound_tx, _inbound_rx) = mpsc::channel(16);
    let conn = ChatConnection::open(test_config(port, 500), inbound_tx);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while accepts.load(Ordering::SeqCst) < 1 {
        assert!(tokio::time::Instant::now() < deadline, "never connected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The dropped connection puts the driver into its fixed 500ms wait;
    // close during that window must win.
    tokio::time::sleep(Duration::from_millis(150)).await;
    conn.close();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn echo_flows_into_store() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let mut next_id = 100i64;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                // Echo the frame back with server-assigned id and timestamp.
                let mut value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                value["id"] = next_id.into();
                next_id += 1;
                value["sentAt"] = serde_json::Value::String(Utc::now().to_rfc3339());
                ws.send(Message::text(value.to_string())).await.unwrap();
            }
        }
    });

    let mut settings = Settings::default();
    settings.chat.ws_url = format!("ws://127.0.0.1:{port}/ws/chat");
    settings.chat.reconnect_interval_ms = 100;
    let client = ChatClient::connect(&settings, "test-token", 1);

    let mut state = client.watch_connection_state();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let mut view = client.conversation_view();
    view.select_correspondent(42);
    let mut updates = client.updates();
    let before = *updates.borrow_and_update();

    view.send_to_active("hi").unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while *updates.borrow_and_update() == before {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("echo never ingested");

    let messages = view.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, 1);
    assert_eq!(messages[0].receiver_id, 42);
    assert_eq!(messages[0].content, "hi");
    client.close();
}

#[tokio::test]
async fn redelivered_frame_is_ingested_once() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let frame = serde_json::json!({
            "id": 9,
            "senderId": 2,
            "receiverId": 1,
            "content": "once",
            "sentAt": "2026-08-27T10:00:00Z"
        })
        .to_string();
        // Deliver the same frame twice, as a flaky transport might.
        ws.send(Message::text(frame.clone())).await.unwrap();
        ws.send(Message::text(frame)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut settings = Settings::default();
    settings.chat.ws_url = format!("ws://127.0.0.1:{port}/ws/chat");
    let client = ChatClient::connect(&settings, "test-token", 1);

    let mut updates = client.updates();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *updates.borrow_and_update() == 0 {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("frame never ingested");
    // Give the duplicate time to arrive and be discarded.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let store = client.store();
    let thread = store.read().await.conversation(1, 2);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].id, 9);
    client.close();
}
