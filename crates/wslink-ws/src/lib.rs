//! Client-side WebSocket connection lifecycle.
//!
//! Provides:
//! - A four-state connection controller (connecting, open, closing, closed)
//! - Ordered, failure-isolated event delivery to observers
//! - Automatic reconnection with bounded attempts and backoff
//! - A pluggable transport, with a tokio-tungstenite implementation

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod reconnect;
mod serial;
pub mod transport;
pub mod tungstenite;

pub use config::ConnectionConfig;
pub use connection::{CompletionCallback, SendHandle, WebSocket};
pub use dispatcher::{EventDispatcher, ObserverId, ObserverResult};
pub use reconnect::{Backoff, ReconnectDecision, ReconnectGovernor, ReconnectPolicy};
pub use transport::{
    RecordingTransport, SendCompletion, TransportCall, TransportChannel, TransportSink,
};
pub use tungstenite::TungsteniteTransport;
pub use wslink_core::{
    ConnectionState, EventKind, Payload, PayloadKind, Role, StateTransition, WsError, WsEvent,
    WsResult, CLOSE_ABNORMAL, CLOSE_NORMAL,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
