//! End-to-end tests against a loopback WebSocket server.

mod common;
use common::mock_ws::{unused_address, MockWsServer, SERVER_CLOSE_CODE};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use wslink_ws::{
    Backoff, ConnectionConfig, ConnectionState, EventKind, Payload, ReconnectPolicy,
    TungsteniteTransport, WebSocket, WsEvent, CLOSE_ABNORMAL, CLOSE_NORMAL,
};

fn connect_to(policy: ReconnectPolicy) -> (WebSocket, UnboundedReceiver<WsEvent>) {
    wslink_ws::init_crypto();
    let transport = Arc::new(TungsteniteTransport::new().unwrap());
    let ws = WebSocket::new(
        ConnectionConfig {
            reconnect: policy,
            close_timeout_ms: 2_000,
            ..ConnectionConfig::default()
        },
        transport,
    )
    .unwrap();
    let (_, rx) = ws.subscribe_channel();
    (ws, rx)
}

fn fast_retry(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        max_attempts,
        backoff: Backoff::Fixed { delay_ms: 50 },
        jitter_ms: 0,
    }
}

async fn next_event(rx: &mut UnboundedReceiver<WsEvent>) -> WsEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Test a full open, echo and client close cycle.
#[tokio::test]
async fn test_open_echo_close() {
    let server = MockWsServer::start().await;
    let (ws, mut events) = connect_to(ReconnectPolicy::disabled());

    ws.connect(&server.url()).unwrap();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Open);
    assert_eq!(ws.ready_state(), ConnectionState::Open);

    let text = ws.send_text("hello").unwrap();
    let binary = ws.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
    text.completed().await.unwrap();
    binary.completed().await.unwrap();

    match next_event(&mut events).await {
        WsEvent::Message(msg) => assert_eq!(msg.payload, Payload::from("hello")),
        other => panic!("expected Message, got {other:?}"),
    }
    match next_event(&mut events).await {
        WsEvent::Message(msg) => {
            assert!(msg.is_binary());
            assert_eq!(msg.payload.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
        }
        other => panic!("expected Message, got {other:?}"),
    }

    ws.close();
    match next_event(&mut events).await {
        WsEvent::Close(close) => {
            assert_eq!(close.code, CLOSE_NORMAL);
            assert!(close.was_clean);
        }
        other => panic!("expected Close, got {other:?}"),
    }
    assert_eq!(ws.ready_state(), ConnectionState::Closed);
    assert!(!ws.reconnect_scheduled());

    server.shutdown().await;
}

/// Test that a server-initiated close is treated as unexpected and retried.
#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let server = MockWsServer::start().await;
    let (ws, mut events) = connect_to(fast_retry(3));

    ws.connect(&server.url()).unwrap();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Open);

    ws.send_text("close").unwrap();
    match next_event(&mut events).await {
        WsEvent::Close(close) => {
            assert_eq!(close.code, SERVER_CLOSE_CODE);
            assert_eq!(close.reason, "bye");
            assert!(close.was_clean);
        }
        other => panic!("expected Close, got {other:?}"),
    }
    assert_eq!(ws.retry_count(), 1);

    assert_eq!(next_event(&mut events).await.kind(), EventKind::Open);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(ws.retry_count(), 0);

    ws.close();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Close);
    server.shutdown().await;
}

/// Test that an abrupt disconnect is reported as an abnormal close.
#[tokio::test]
async fn test_dropped_connection_is_abnormal() {
    let server = MockWsServer::start().await;
    let (ws, mut events) = connect_to(ReconnectPolicy::disabled());

    ws.connect(&server.url()).unwrap();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Open);

    ws.send_text("drop").unwrap();
    let close = loop {
        match next_event(&mut events).await {
            WsEvent::Close(close) => break close,
            WsEvent::Error(_) => continue,
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(close.code, CLOSE_ABNORMAL);
    assert!(!close.was_clean);
    assert_eq!(ws.ready_state(), ConnectionState::Closed);

    server.shutdown().await;
}

/// Test that a refused handshake yields error then close, with no open.
#[tokio::test]
async fn test_handshake_failure() {
    let address = unused_address().await;
    let (ws, mut events) = connect_to(ReconnectPolicy::disabled());

    ws.connect(&address).unwrap();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Error);
    match next_event(&mut events).await {
        WsEvent::Close(close) => {
            assert_eq!(close.code, CLOSE_ABNORMAL);
            assert!(!close.was_clean);
        }
        other => panic!("expected Close, got {other:?}"),
    }
    assert_eq!(ws.ready_state(), ConnectionState::Closed);
    assert!(ws.send_text("nope").is_err());
}

/// Test that closing mid-handshake never reports an open.
#[tokio::test]
async fn test_close_during_handshake() {
    let server = MockWsServer::start().await;
    let (ws, mut events) = connect_to(fast_retry(3));

    ws.connect(&server.url()).unwrap();
    ws.close();

    assert_eq!(next_event(&mut events).await.kind(), EventKind::Close);
    assert_eq!(ws.ready_state(), ConnectionState::Closed);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());
    assert!(!ws.reconnect_scheduled());

    server.shutdown().await;
}

/// Test that a server ignoring our Close cannot keep the socket alive.
#[tokio::test]
async fn test_unanswered_close_releases_socket() {
    let server = MockWsServer::start().await;
    wslink_ws::init_crypto();
    let transport = TungsteniteTransport::new()
        .unwrap()
        .with_close_timeout(Duration::from_millis(300));
    let ws = WebSocket::new(
        ConnectionConfig {
            reconnect: fast_retry(3),
            close_timeout_ms: 10_000,
            ..ConnectionConfig::default()
        },
        Arc::new(transport),
    )
    .unwrap();
    let (_, mut events) = ws.subscribe_channel();

    ws.connect(&server.url()).unwrap();
    assert_eq!(next_event(&mut events).await.kind(), EventKind::Open);
    ws.send_text("mute").unwrap().completed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    ws.close();
    let close = timeout(Duration::from_secs(2), next_event(&mut events))
        .await
        .expect("transport kept waiting for the Close reply");
    match close {
        WsEvent::Close(close) => {
            assert_eq!(close.code, CLOSE_ABNORMAL);
            assert!(!close.was_clean);
        }
        other => panic!("expected Close, got {other:?}"),
    }
    assert_eq!(ws.ready_state(), ConnectionState::Closed);
    assert!(!ws.reconnect_scheduled());

    timeout(Duration::from_secs(2), async {
        while server.muted_disconnect_count() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("socket was never released");

    server.shutdown().await;
}
