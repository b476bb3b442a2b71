//! Pure classification of inbound frames.
//!
//! These functions decide what a frame *means* for a given request kind;
//! the proxy's dispatcher acts on the answer.

use crate::error::XfsError;
use crate::frame::Frame;
use crate::message::{EventClass, Marker};

/// What a frame does to a pending `WFSExecute` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStep {
    /// Terminal: failure, or success marked `WFS_EXECUTE_COMPLETE`.
    Complete,
    /// Success marked `WFS_EXECUTE_EVENT`.
    Event,
    /// Success without a marker: the device queued the command.
    Accepted,
    /// Success with a marker that means nothing for a command.
    Ignored,
}

/// What a frame does to a pending `WFSGetInfo` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetInfoStep {
    Complete,
    Waiting,
}

/// Unsolicited event class carried by `frame`, if any.
pub fn classify(frame: &Frame) -> Option<EventClass> {
    frame.marker().and_then(|m| m.event_class())
}

pub fn execute_step(frame: &Frame) -> ExecuteStep {
    if !frame.is_success() {
        return ExecuteStep::Complete;
    }
    if !frame.has_marker() {
        return ExecuteStep::Accepted;
    }
    match frame.marker() {
        Some(Marker::ExecuteComplete) => ExecuteStep::Complete,
        Some(Marker::ExecuteEvent) => ExecuteStep::Event,
        _ => ExecuteStep::Ignored,
    }
}

pub fn get_info_step(frame: &Frame) -> GetInfoStep {
    if !frame.is_success() || frame.marker() == Some(Marker::GetInfoComplete) {
        GetInfoStep::Complete
    } else {
        GetInfoStep::Waiting
    }
}

/// A successful acceptance or completion must echo the command it answers.
///
/// Frames without `dwCommandCode` are not checked.
pub fn check_command_code(request_id: &str, expected: &str, frame: &Frame) -> Result<(), XfsError> {
    if !frame.is_success() {
        return Ok(());
    }
    match frame.command_code() {
        Some(code) if code != expected => Err(XfsError::ProtocolViolation {
            request_id: request_id.to_string(),
            reason: format!("reply names command {code:?}, request was {expected:?}"),
        }),
        _ => Ok(()),
    }
}
