//! Connection lifecycle state.
//!
//! A connection moves `Connecting → Open → Closing → Closed`. A handshake
//! that fails or is cancelled may leave `Connecting` directly for `Closing`
//! or `Closed`. A closed instance may be reused, which re-enters
//! `Connecting`.

use serde::{Deserialize, Serialize};

/// Current state of a connection.
///
/// The default is `Connecting`: an instance that has never been asked to
/// connect reports `Connecting`, there is no separate idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Handshake in progress, or not yet started.
    #[default]
    Connecting,
    /// Handshake complete; sending and receiving are permitted.
    Open,
    /// Close requested locally or by the peer; teardown in progress.
    Closing,
    /// Terminal for the current attempt.
    Closed,
}

impl ConnectionState {
    /// Check whether `self → next` is a legal lifecycle step.
    ///
    /// Staying in the same state is not a transition and returns `false`.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Closing, Closed)
                | (Closed, Connecting)
        )
    }

    /// Check if messages may be sent in this state.
    #[must_use]
    pub fn can_send(self) -> bool {
        self == ConnectionState::Open
    }

    /// Check if a teardown is underway or finished.
    #[must_use]
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }

    /// Lowercase label, used for logging and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the connection an instance plays.
///
/// Only clients may initiate a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Server,
}

impl Role {
    #[must_use]
    pub fn is_client(self) -> bool {
        self == Role::Client
    }
}

/// A single observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl StateTransition {
    pub fn new(from: ConnectionState, to: ConnectionState) -> Self {
        Self { from, to }
    }
}
