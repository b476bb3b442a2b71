//! Wire vocabulary: request functions, inbound markers and result codes.
//!
//! Uses proper enums with `TryFrom`; unknown markers are reported, not
//! panicked on.

use crate::error::XfsError;
use std::fmt;

// ── Result codes ─────────────────────────────────────────────────

/// `hResult` value of a successful frame.
pub const WFS_SUCCESS: &str = "WFS_SUCCESS";

/// `hResult` synthesised for requests left pending when the link drops.
pub const WFS_ERR_CONNECTION_LOST: &str = "WFS_ERR_CONNECTION_LOST";

/// `hResult` reported by the peer for a command that was cancelled.
pub const WFS_ERR_CANCELED: &str = "WFS_ERR_CANCELED";

// ── Function ─────────────────────────────────────────────────────

/// The `function` field of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Run a device command.
    Execute,
    /// Query a capability/status category.
    GetInfo,
    /// Cancel a command (a specific one, or the device's current one).
    Cancel,
}

impl Function {
    /// Wire spelling of this function.
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Execute => "WFSExecute",
            Function::GetInfo => "WFSGetInfo",
            Function::Cancel => "WFSCancel",
        }
    }
}

impl TryFrom<&str> for Function {
    type Error = XfsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "WFSExecute" => Ok(Function::Execute),
            "WFSGetInfo" => Ok(Function::GetInfo),
            "WFSCancel" => Ok(Function::Cancel),
            other => Err(XfsError::Other(format!("unknown function {other:?}"))),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Marker ───────────────────────────────────────────────────────

/// The optional `message` field of an inbound frame.
///
/// A frame without a marker is an acceptance (for `Execute`) or an
/// intermediate acknowledgement (for `GetInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    ExecuteComplete,
    ExecuteEvent,
    GetInfoComplete,
    ServiceEvent,
    UserEvent,
    SystemEvent,
}

impl Marker {
    /// Wire spelling of this marker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::ExecuteComplete => "WFS_EXECUTE_COMPLETE",
            Marker::ExecuteEvent => "WFS_EXECUTE_EVENT",
            Marker::GetInfoComplete => "WFS_GETINFO_COMPLETE",
            Marker::ServiceEvent => "WFS_SERVICE_EVENT",
            Marker::UserEvent => "WFS_USER_EVENT",
            Marker::SystemEvent => "WFS_SYSTEM_EVENT",
        }
    }

    /// The event class for markers that are not tied to a request.
    pub fn event_class(&self) -> Option<EventClass> {
        match self {
            Marker::ServiceEvent => Some(EventClass::Service),
            Marker::UserEvent => Some(EventClass::User),
            Marker::SystemEvent => Some(EventClass::System),
            _ => None,
        }
    }
}

impl TryFrom<&str> for Marker {
    type Error = XfsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "WFS_EXECUTE_COMPLETE" => Ok(Marker::ExecuteComplete),
            "WFS_EXECUTE_EVENT" => Ok(Marker::ExecuteEvent),
            "WFS_GETINFO_COMPLETE" => Ok(Marker::GetInfoComplete),
            "WFS_SERVICE_EVENT" => Ok(Marker::ServiceEvent),
            "WFS_USER_EVENT" => Ok(Marker::UserEvent),
            "WFS_SYSTEM_EVENT" => Ok(Marker::SystemEvent),
            other => Err(XfsError::Other(format!("unknown message marker {other:?}"))),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── EventClass ───────────────────────────────────────────────────

/// Classification of unsolicited device events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Service,
    User,
    System,
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
