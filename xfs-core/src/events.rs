//! Events published by a [`DeviceProxy`](crate::DeviceProxy).
//!
//! Each proxy publishes on a `tokio::sync::broadcast` channel; any number
//! of consumers may [`subscribe`](crate::DeviceProxy::subscribe). Events
//! published while nobody is subscribed are dropped.
//!
//! Unsolicited events are also handed to an optional [`EventHandler`]
//! before they are published, for consumers that translate raw events
//! into device-specific state.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::frame::Frame;
use crate::state::AcceptedCommand;

/// Sending half of a proxy's event channel.
pub type EventSink = broadcast::Sender<DeviceEvent>;

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A command issued on this proxy finished (any result code).
    ExecuteComplete(Frame),

    /// Intermediate progress for a running command.
    ExecuteEvent(Frame),

    /// The peer settled a cancel request issued on this proxy.
    CancelComplete(Frame),

    /// A command issued on any proxy sharing this device identity
    /// finished.
    Broadcast {
        message: Frame,
        command_code: String,
        payload: Value,
    },

    /// Device/service state change.
    ServiceEvent(Frame),

    /// Prompt for the person at the device (insert card, take cash, …).
    UserEvent(Frame),

    /// System-level event, with the device's current command as context.
    /// `command_code` is empty and `payload` null when nothing is queued.
    SystemEvent {
        message: Frame,
        command_code: String,
        payload: Value,
    },

    /// The link to the device server dropped.
    Disconnected,
}

/// Hooks for unsolicited device events.
///
/// All methods default to no-ops; implement the ones you need.
pub trait EventHandler: Send + Sync {
    fn service_event(&self, _msg: &Frame) {}

    fn user_event(&self, _msg: &Frame) {}

    fn system_event(&self, _msg: &Frame, _current: Option<&AcceptedCommand>) {}
}

/// Handler used when none is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}
