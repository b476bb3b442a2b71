//! Link state machine used by the transport gate.
//!
//! Provides a `ConnectionPhase` enum that models the lifecycle of the
//! duplex stream underneath a proxy, with validated transitions that
//! return `Result` instead of panicking.

use std::time::Instant;

use crate::error::XfsError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of a proxy's link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲                │             │
///       └────────────────┴─────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No stream. Initial state, and the state after any failure.
    #[default]
    Disconnected,

    /// A connect attempt is in progress.
    Connecting,

    /// Reader and writer tasks are running.
    Connected {
        /// When the link entered the `Connected` state.
        since: Instant,
    },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the link has been up; `None` unless `Connected`.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), XfsError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(XfsError::Other(format!("cannot connect: link is {self}"))),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), XfsError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(XfsError::Other(format!(
                "cannot complete connect: link is {self}"
            ))),
        }
    }

    /// Force-reset to `Disconnected` (failed attempt, dropped stream).
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
