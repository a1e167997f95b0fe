//! Connection lifecycle scenarios driven through the recording transport.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wslink_ws::{
    Backoff, ConnectionConfig, ConnectionState, EventKind, Payload, ReconnectPolicy,
    RecordingTransport, StateTransition, WebSocket, WsEvent, CLOSE_ABNORMAL,
};

const ADDR: &str = "wss://echo.example.com/socket";
const RETRY_DELAY: Duration = Duration::from_millis(250);

fn setup(max_attempts: u32) -> (WebSocket, Arc<RecordingTransport>, Arc<Mutex<Vec<WsEvent>>>) {
    let transport = RecordingTransport::new();
    let config = ConnectionConfig {
        reconnect: ReconnectPolicy {
            enabled: true,
            max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: RETRY_DELAY.as_millis() as u64,
            },
            jitter_ms: 0,
        },
        ..ConnectionConfig::default()
    };
    let ws = WebSocket::new(config, transport.clone()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    ws.subscribe(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    (ws, transport, events)
}

fn collect(rx: &mut tokio::sync::mpsc::UnboundedReceiver<StateTransition>) -> Vec<StateTransition> {
    let mut out = Vec::new();
    while let Ok(t) = rx.try_recv() {
        out.push(t);
    }
    out
}

/// Test connect, open, send, then an unexpected close that schedules a retry.
#[tokio::test(start_paused = true)]
async fn test_open_send_unexpected_close() {
    let (ws, transport, events) = setup(5);
    let mut transitions = ws.state_transitions();

    ws.connect(ADDR).unwrap();
    assert_eq!(ws.ready_state(), ConnectionState::Connecting);

    transport.open();
    assert_eq!(ws.ready_state(), ConnectionState::Open);

    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    ws.send_with(Payload::from("hello"), move |result| {
        assert!(result.is_ok());
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert_eq!(transport.sent_payloads(), vec![Payload::from("hello")]);
    transport.complete_next_send();
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    transport.close(CLOSE_ABNORMAL, "connection reset", false);
    assert_eq!(ws.ready_state(), ConnectionState::Closed);

    let kinds: Vec<_> = events.lock().iter().map(WsEvent::kind).collect();
    assert_eq!(kinds, vec![EventKind::Open, EventKind::Close]);
    assert!(ws.reconnect_scheduled());
    assert_eq!(ws.retry_count(), 1);

    let seen: Vec<_> = collect(&mut transitions)
        .into_iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        seen,
        vec![
            (ConnectionState::Connecting, ConnectionState::Open),
            (ConnectionState::Open, ConnectionState::Closing),
            (ConnectionState::Closing, ConnectionState::Closed),
        ]
    );
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

/// Test that with a maximum of two, the third retry is suppressed.
#[tokio::test(start_paused = true)]
async fn test_third_retry_suppressed() {
    let (ws, transport, events) = setup(2);
    ws.connect(ADDR).unwrap();
    transport.open();

    transport.close(CLOSE_ABNORMAL, "", false);
    tokio::time::sleep(RETRY_DELAY + Duration::from_millis(1)).await;
    transport.fail_handshake("refused");
    tokio::time::sleep(RETRY_DELAY + Duration::from_millis(1)).await;
    transport.fail_handshake("refused");
    tokio::time::sleep(RETRY_DELAY * 10).await;

    assert_eq!(transport.connect_count(), 3);
    assert!(ws.reconnect_exhausted());
    assert_eq!(ws.retry_count(), 2);

    let err = ws.connect(ADDR).unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(ws.retry_count(), 2);
    assert_eq!(transport.connect_count(), 3);

    let closes = events
        .lock()
        .iter()
        .filter(|e| e.kind() == EventKind::Close)
        .count();
    assert_eq!(closes, 3);
}

/// Test that every state change is a legal single step.
#[tokio::test(start_paused = true)]
async fn test_transitions_never_skip_states() {
    let (ws, transport, _events) = setup(0);
    let mut transitions = ws.state_transitions();

    ws.connect(ADDR).unwrap();
    transport.open();
    transport.close(CLOSE_ABNORMAL, "", false);
    tokio::time::sleep(RETRY_DELAY * 2).await;
    transport.fail_handshake("refused");
    tokio::time::sleep(RETRY_DELAY * 2).await;
    transport.open();
    ws.close();
    transport.close(1000, "", true);

    let seen = collect(&mut transitions);
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|t| t.from.can_transition_to(t.to)));
    assert!(seen.windows(2).all(|w| w[0].to == w[1].from));
    assert_eq!(seen.last().map(|t| t.to), Some(ConnectionState::Closed));
}

/// Test that racing close and connect calls leave a consistent state.
#[tokio::test]
async fn test_racing_connect_and_close() {
    let (ws, transport, events) = setup(0);
    ws.connect(ADDR).unwrap();
    transport.open();

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let ws = ws.clone();
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    ws.close();
                } else {
                    let _ = ws.connect(ADDR);
                    let _ = ws.send_text("race");
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(ws.ready_state(), ConnectionState::Closing);
    assert_eq!(transport.close_count(), 1);
    transport.close(1000, "", true);
    assert_eq!(ws.ready_state(), ConnectionState::Closed);

    // Every accepted send settled exactly once.
    assert_eq!(ws.pending_sends(), 0);
    let closes = events
        .lock()
        .iter()
        .filter(|e| e.kind() == EventKind::Close)
        .count();
    assert_eq!(closes, 1);
}
