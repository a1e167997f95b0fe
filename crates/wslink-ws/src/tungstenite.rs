//! Network transport backed by tokio-tungstenite.
//!
//! Every `begin_connect` spawns one driver task that owns the socket for
//! that attempt. Sends and close requests reach the driver over an
//! unbounded channel, so `begin_*` never waits on the network.

use crate::transport::{SendCompletion, TransportChannel, TransportSink};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::connect_async_tls_with_config;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use wslink_core::{Payload, WsError, WsResult, CLOSE_ABNORMAL, CLOSE_NORMAL};

enum Command {
    Send {
        payload: Payload,
        completion: SendCompletion,
    },
    Close,
}

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// [`TransportChannel`] over a real WebSocket connection.
pub struct TungsteniteTransport {
    current: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    runtime: Handle,
    disable_nagle: bool,
    close_timeout: Duration,
}

impl TungsteniteTransport {
    /// Must be called inside a tokio runtime.
    pub fn new() -> WsResult<Self> {
        let runtime = Handle::try_current().map_err(|_| WsError::NoRuntime)?;
        Ok(Self {
            current: Mutex::new(None),
            runtime,
            disable_nagle: true,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        })
    }

    /// TCP_NODELAY on the underlying socket. Default: on.
    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.disable_nagle = enabled;
        self
    }

    /// How long the driver waits for the server's Close reply before it
    /// drops the socket. Default: 5s.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.current.lock().clone()
    }
}

impl TransportChannel for TungsteniteTransport {
    fn begin_connect(&self, address: &str, sink: TransportSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Dropping the previous sender ends the previous driver.
        *self.current.lock() = Some(tx);
        self.runtime.spawn(drive(
            address.to_string(),
            sink,
            rx,
            self.disable_nagle,
            self.close_timeout,
        ));
    }

    fn begin_send(&self, payload: Payload, completion: SendCompletion) {
        match self.sender() {
            // A rejected command drops its completion, which fails the send.
            Some(tx) => {
                let _ = tx.send(Command::Send {
                    payload,
                    completion,
                });
            }
            None => completion.fail("transport not connected"),
        }
    }

    fn begin_close(&self, sink: TransportSink) {
        let delivered = self
            .sender()
            .map_or(false, |tx| tx.send(Command::Close).is_ok());
        if !delivered {
            sink.closed(CLOSE_ABNORMAL, "transport not connected", false);
        }
    }
}

async fn drive(
    address: String,
    sink: TransportSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
    disable_nagle: bool,
    close_timeout: Duration,
) {
    let generation = sink.generation();
    info!(generation, %address, "Opening WebSocket");

    let connect = connect_async_tls_with_config(address.as_str(), None, disable_nagle, None);
    tokio::pin!(connect);

    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    warn!(generation, error = %e, "WebSocket handshake failed");
                    sink.error(e.to_string());
                    sink.closed(CLOSE_ABNORMAL, e.to_string(), false);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send { completion, .. }) => completion.fail("connection not open"),
                Some(Command::Close) | None => {
                    debug!(generation, "Handshake aborted");
                    sink.closed(CLOSE_ABNORMAL, "handshake aborted", false);
                    return;
                }
            },
        }
    };

    sink.opened();
    let (mut write, mut read) = stream.split();
    let mut closing = false;
    let close_wait = sleep(close_timeout);
    tokio::pin!(close_wait);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => sink.message(Payload::Text(text)),
                Some(Ok(Message::Binary(data))) => sink.message(Payload::Binary(data)),
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_))) => debug!("Received pong"),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason): (u16, String) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    if closing {
                        debug!(code, "Close acknowledged by server");
                    } else {
                        info!(code, %reason, "WebSocket closed by server");
                    }
                    if let Err(e) = write.close().await {
                        debug!(error = %e, "Close flush failed");
                    }
                    sink.closed(code, reason, true);
                    return;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket read error");
                    sink.error(e.to_string());
                    sink.closed(CLOSE_ABNORMAL, e.to_string(), false);
                    return;
                }
                None => {
                    warn!("WebSocket stream ended");
                    sink.closed(CLOSE_ABNORMAL, "stream ended", false);
                    return;
                }
            },
            () = &mut close_wait, if closing => {
                warn!(generation, "Server did not answer Close, dropping socket");
                sink.closed(CLOSE_ABNORMAL, "close handshake timed out", false);
                return;
            }
            command = commands.recv() => match command {
                Some(Command::Send { completion, .. }) if closing => {
                    completion.fail("connection closing");
                }
                Some(Command::Send { payload, completion }) => {
                    let msg = match payload {
                        Payload::Text(text) => Message::Text(text),
                        Payload::Binary(data) => Message::Binary(data),
                    };
                    match write.send(msg).await {
                        Ok(()) => completion.succeed(),
                        Err(e) => completion.fail(e.to_string()),
                    }
                }
                Some(Command::Close) if closing => {}
                Some(Command::Close) => {
                    closing = true;
                    close_wait.as_mut().reset(Instant::now() + close_timeout);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        warn!(error = %e, "Failed to send Close frame");
                        sink.closed(CLOSE_ABNORMAL, e.to_string(), false);
                        return;
                    }
                }
                None => {
                    // Superseded by a newer attempt; nobody listens to this sink.
                    debug!(generation, "Driver released");
                    if !closing {
                        let _ = write.send(Message::Close(None)).await;
                    }
                    return;
                }
            },
        }
    }
}
