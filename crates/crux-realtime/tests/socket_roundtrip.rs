//! End-to-end socket tests against an in-process websocket server speaking
//! the realtime protocol.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crux_realtime::{ConnectionState, RealtimeClient, RealtimeConfig};
use crux_types::events::{
    ChangeEvent, ChangeOp, ClientCommand, RelayMessage, ServerFrame, SubscriptionKey,
};

type ServerSocket = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept failed");
    tokio_tungstenite::accept_async(stream).await.expect("handshake failed")
}

async fn next_command(ws: &mut ServerSocket) -> ClientCommand {
    loop {
        match ws.next().await.expect("socket closed").expect("read failed") {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("bad command")
            }
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.expect("pong failed");
            }
            _ => {}
        }
    }
}

/// Read commands until a Subscribe shows up. The client may send the same
/// Subscribe twice around connect (queued + replay); both are tolerated.
async fn wait_subscribe(ws: &mut ServerSocket) -> SubscriptionKey {
    loop {
        if let ClientCommand::Subscribe { key } = next_command(ws).await {
            return key;
        }
    }
}

async fn send_frame(ws: &mut ServerSocket, frame: &ServerFrame) {
    let text = serde_json::to_string(frame).expect("encode failed");
    ws.send(Message::Text(text.into())).await.expect("send failed");
}

fn change_for(key: &SubscriptionKey) -> ServerFrame {
    ServerFrame::Change(ChangeEvent {
        topic: key.topic.clone(),
        op: ChangeOp::Insert,
        key: Uuid::new_v4(),
        row: serde_json::json!({"id": "row-1"}),
    })
}

fn client_for(addr: std::net::SocketAddr, cancel: &CancellationToken) -> RealtimeClient {
    let mut config = RealtimeConfig::new(format!("ws://{addr}"));
    config.reconnect_base = Duration::from_millis(50);
    config.reconnect_max = Duration::from_millis(200);
    RealtimeClient::connect(config, Arc::new(|| Some("test-token".into())), cancel.clone())
}

async fn wait_connected(client: &RealtimeClient) {
    let mut state = client.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() != ConnectionState::Connected {
            state.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("never connected");
}

#[tokio::test]
async fn identify_then_subscribe_then_change_delivery() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let identify = next_command(&mut ws).await;
        assert!(matches!(identify, ClientCommand::Identify { token } if token == "test-token"));
        send_frame(&mut ws, &ServerFrame::Ready { user_id: Uuid::new_v4() }).await;

        let key = wait_subscribe(&mut ws).await;
        assert_eq!(key.topic, "event_participants");
        send_frame(&mut ws, &ServerFrame::Subscribed { key: key.clone() }).await;
        send_frame(&mut ws, &change_for(&key)).await;

        // Hold the socket open until the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let cancel = CancellationToken::new();
    let client = client_for(addr, &cancel);
    let (handle, mut changes) = client
        .registry()
        .subscribe(SubscriptionKey::filtered("event_participants", "event_id=eq.e1"));

    wait_connected(&client).await;

    let event = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("no change delivered")
        .expect("channel closed");
    assert_eq!(event.topic, "event_participants");
    assert_eq!(event.row["id"], "row-1");

    client.registry().unsubscribe(&handle);
    cancel.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn reconnect_replays_subscriptions_on_the_same_receiver() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: deliver one change, then drop the socket.
        let mut ws = accept(&listener).await;
        let _ = next_command(&mut ws).await; // Identify
        let key = wait_subscribe(&mut ws).await;
        send_frame(&mut ws, &change_for(&key)).await;
        drop(ws);

        // Second connection: the client must identify and resubscribe on
        // its own, with no local action from the consumer.
        let mut ws = accept(&listener).await;
        let identify = next_command(&mut ws).await;
        assert!(matches!(identify, ClientCommand::Identify { .. }));
        let key = wait_subscribe(&mut ws).await;
        assert_eq!(key.topic, "messages");
        send_frame(&mut ws, &change_for(&key)).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let cancel = CancellationToken::new();
    let client = client_for(addr, &cancel);
    let (_handle, mut changes) = client
        .registry()
        .subscribe(SubscriptionKey::topic("messages"));

    let first = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("no first change")
        .expect("channel closed");
    assert_eq!(first.topic, "messages");

    let second = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("no change after reconnect")
        .expect("channel closed");
    assert_eq!(second.topic, "messages");

    cancel.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn relay_delivers_foreign_messages_and_drops_echoes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let _ = next_command(&mut ws).await; // Identify

        // Wait for the client's Publish, echo it back verbatim (as the
        // backend does), then follow with a message from "another tab".
        let message = loop {
            if let ClientCommand::Publish { message } = next_command(&mut ws).await {
                break message;
            }
        };
        send_frame(&mut ws, &ServerFrame::Broadcast(message.clone())).await;
        send_frame(
            &mut ws,
            &ServerFrame::Broadcast(RelayMessage {
                topic: message.topic.clone(),
                reason: "recompute from another tab".into(),
                origin: Uuid::new_v4(),
            }),
        )
        .await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let cancel = CancellationToken::new();
    let client = client_for(addr, &cancel);
    let mut relayed = client.relay().messages();

    wait_connected(&client).await;
    client.relay().broadcast("leaderboard", "admin recompute");

    // The echo of our own broadcast must be swallowed; the foreign message
    // must come through. Receiving the foreign one first proves the echo
    // was dropped (the server sent it earlier on the same socket).
    let message = tokio::time::timeout(Duration::from_secs(5), relayed.recv())
        .await
        .expect("no relay message")
        .expect("channel closed");
    assert_eq!(message.reason, "recompute from another tab");
    assert!(relayed.try_recv().is_err());

    cancel.cancel();
    server.await.unwrap();
}
