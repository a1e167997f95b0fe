//! Prometheus metrics for WebSocket connections.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use wslink_core::WsEvent;

/// WebSocket connection state (1 = open, 0 = not open).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("wslink_ws_connected", "WebSocket connection state (1=open)").unwrap()
});

/// Dispatched events.
/// Labels: kind (open/message/error/close)
pub static WS_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wslink_ws_events_total",
        "Total connection events dispatched",
        &["kind"]
    )
    .unwrap()
});

/// Closes by cleanliness.
pub static WS_CLOSE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wslink_ws_close_total",
        "Total connection closes",
        &["clean"]
    )
    .unwrap()
});

/// Received messages.
/// Labels: kind (text/binary)
pub static WS_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wslink_ws_messages_total",
        "Total messages received",
        &["kind"]
    )
    .unwrap()
});

/// Received message size in bytes.
pub static WS_MESSAGE_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "wslink_ws_message_bytes",
        "Received message size in bytes",
        &["kind"],
        vec![16.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0]
    )
    .unwrap()
});

/// Settled sends.
/// Labels: result (ok/failed)
pub static WS_SENDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wslink_ws_sends_total",
        "Total sends settled by the transport",
        &["result"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    pub fn event(kind: &str) {
        WS_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn closed(was_clean: bool) {
        let clean = if was_clean { "true" } else { "false" };
        WS_CLOSE_TOTAL.with_label_values(&[clean]).inc();
    }

    pub fn message_received(kind: &str, bytes: usize) {
        WS_MESSAGES_TOTAL.with_label_values(&[kind]).inc();
        WS_MESSAGE_BYTES
            .with_label_values(&[kind])
            .observe(bytes as f64);
    }

    pub fn send_settled(ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        WS_SENDS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Records connection events into the metrics above.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl MetricsObserver {
    pub fn record(&self, event: &WsEvent) {
        Metrics::event(event.kind().as_str());
        match event {
            WsEvent::Open(_) => Metrics::ws_connected(),
            WsEvent::Message(msg) => {
                Metrics::message_received(msg.payload.kind().as_str(), msg.payload.len());
            }
            WsEvent::Error(_) => {}
            WsEvent::Close(close) => {
                Metrics::ws_disconnected();
                Metrics::closed(close.was_clean);
            }
        }
    }

    /// Observer callback suitable for `WebSocket::subscribe`.
    pub fn callback(
        self,
    ) -> impl Fn(&WsEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
           + Send
           + Sync
           + 'static {
        move |event| {
            self.record(event);
            Ok(())
        }
    }
}
