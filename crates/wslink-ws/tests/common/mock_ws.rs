//! Loopback WebSocket server for transport tests.
//!
//! Echoes text and binary messages back to the client. Three text commands
//! change its behavior:
//! - `"close"`: the server starts a closing handshake with code 4000
//! - `"drop"`: the server drops the TCP connection without a close frame
//! - `"mute"`: the server stops answering, including Close frames, and
//!   holds the socket until the client drops it

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const SERVER_CLOSE_CODE: u16 = 4000;

pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    connections: Arc<AtomicUsize>,
    muted_disconnects: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let muted_disconnects = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let counter = connections.clone();
        let muted = muted_disconnects.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(handle_connection(stream, muted.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            connections,
            muted_disconnects,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Muted connections whose client has since closed the TCP stream.
    pub fn muted_disconnect_count(&self) -> usize {
        self.muted_disconnects.load(Ordering::SeqCst)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Address on which nothing is listening.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

async fn handle_connection(stream: TcpStream, muted_disconnects: Arc<AtomicUsize>) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) if text == "close" => {
                let frame = CloseFrame {
                    code: CloseCode::from(SERVER_CLOSE_CODE),
                    reason: "bye".into(),
                };
                let _ = ws.close(Some(frame)).await;
            }
            Ok(Message::Text(text)) if text == "drop" => return,
            Ok(Message::Text(text)) if text == "mute" => {
                // Swallow raw bytes so no Close reply is ever produced.
                let mut buf = [0u8; 1024];
                while let Ok(n) = ws.get_mut().read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
                muted_disconnects.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
                if ws.send(msg).await.is_err() {
                    return;
                }
            }
            // Keep reading after a close so the reply gets flushed.
            Ok(_) => {}
            Err(_) => return,
        }
    }
}
