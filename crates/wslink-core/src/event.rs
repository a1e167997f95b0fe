//! Connection events delivered to observers.

use crate::payload::{Payload, PayloadKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The connection has been established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEvent {
    pub address: String,
    pub at: DateTime<Utc>,
}

/// A message was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub payload: Payload,
    pub at: DateTime<Utc>,
}

impl MessageEvent {
    pub fn is_text(&self) -> bool {
        self.payload.is_text()
    }

    pub fn is_binary(&self) -> bool {
        self.payload.is_binary()
    }
}

/// The connection reported an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Human-readable cause.
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The connection has been closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseEvent {
    /// WebSocket close code (1000 normal, 1006 abnormal, ...).
    pub code: u16,
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
    pub at: DateTime<Utc>,
}

/// Notification delivered by the event dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsEvent {
    Open(OpenEvent),
    Message(MessageEvent),
    Error(ErrorEvent),
    Close(CloseEvent),
}

/// Discriminant of a [`WsEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl WsEvent {
    pub fn open(address: impl Into<String>) -> Self {
        WsEvent::Open(OpenEvent {
            address: address.into(),
            at: Utc::now(),
        })
    }

    pub fn message(payload: Payload) -> Self {
        WsEvent::Message(MessageEvent {
            payload,
            at: Utc::now(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsEvent::Error(ErrorEvent {
            message: message.into(),
            at: Utc::now(),
        })
    }

    pub fn close(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        WsEvent::Close(CloseEvent {
            code,
            reason: reason.into(),
            was_clean,
            at: Utc::now(),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open(_) => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Close(_) => EventKind::Close,
        }
    }

    /// Message payload kind, if this is a message event.
    pub fn payload_kind(&self) -> Option<PayloadKind> {
        match self {
            Self::Message(msg) => Some(msg.payload.kind()),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Open(e) => e.at,
            Self::Message(e) => e.at,
            Self::Error(e) => e.at,
            Self::Close(e) => e.at,
        }
    }
}
