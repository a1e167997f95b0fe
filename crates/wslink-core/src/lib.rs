//! Core connection types for wslink WebSocket clients.
//!
//! This crate provides the data model shared by the controller, the
//! transports and the telemetry layer:
//! - `ConnectionState`: the four-state lifecycle and its legal transitions
//! - `Role`: client/server capability flag
//! - `Payload`: opaque binary or UTF-8 text message body
//! - `WsEvent`: tagged Open/Message/Error/Close notifications
//! - `WsError`: the error taxonomy surfaced to callers

pub mod error;
pub mod event;
pub mod payload;
pub mod state;

pub use error::{WsError, WsResult};
pub use event::{CloseEvent, ErrorEvent, EventKind, MessageEvent, OpenEvent, WsEvent};
pub use payload::{Payload, PayloadKind};
pub use state::{ConnectionState, Role, StateTransition};

/// Close code for a normal, negotiated closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
