//! One structured key → value message, as carried on the wire.
//!
//! Outbound frames are built with [`Frame::execute`], [`Frame::get_info`]
//! and [`Frame::cancel`]; inbound frames are read through the typed
//! accessors ([`Frame::msgid`], [`Frame::h_result`], [`Frame::marker`], …).
//! Everything else in the map is opaque device data and is passed through
//! untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::XfsError;
use crate::message::{Function, Marker, WFS_ERR_CONNECTION_LOST, WFS_SUCCESS};

/// Field names used by the engine.
pub mod fields {
    pub const FUNCTION: &str = "function";
    pub const COMMAND: &str = "dwCommand";
    pub const COMMAND_DATA: &str = "lpCmdData";
    pub const MSGID: &str = "msgid";
    pub const REQUEST_ID: &str = "RequestID";
    pub const RESULT: &str = "hResult";
    pub const MARKER: &str = "message";
    pub const COMMAND_CODE: &str = "dwCommandCode";
    pub const BUFFER: &str = "lpBuffer";
}

/// Generate a fresh request id (a braced UUID v4).
pub fn new_request_id() -> String {
    format!("{{{}}}", uuid::Uuid::new_v4())
}

/// A single protocol message.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(Map<String, Value>);

impl Frame {
    pub fn new() -> Self {
        Self(Map::new())
    }

    // ── Outbound builders ────────────────────────────────────────

    /// Request that the device run `command` with `payload`.
    pub fn execute(msgid: &str, command: &str, payload: Value) -> Self {
        Self::request(Function::Execute, msgid, command, payload)
    }

    /// Query the `category` information class.
    pub fn get_info(msgid: &str, category: &str, query: Value) -> Self {
        Self::request(Function::GetInfo, msgid, category, query)
    }

    /// Cancel `target`, or the device's current command when `None`.
    pub fn cancel(msgid: &str, target: Option<&str>) -> Self {
        let mut frame = Self::new()
            .with(fields::FUNCTION, Function::Cancel.as_str())
            .with(fields::MSGID, msgid);
        if let Some(target) = target.filter(|t| !t.is_empty()) {
            frame.insert(fields::REQUEST_ID, target);
        }
        frame
    }

    /// The completion synthesised for a request whose link dropped.
    pub fn connection_lost(msgid: &str, command_code: &str) -> Self {
        Self::new()
            .with(fields::RESULT, WFS_ERR_CONNECTION_LOST)
            .with(fields::MSGID, msgid)
            .with(fields::COMMAND_CODE, command_code)
    }

    fn request(function: Function, msgid: &str, command: &str, data: Value) -> Self {
        Self::new()
            .with(fields::COMMAND, command)
            .with(fields::FUNCTION, function.as_str())
            .with(fields::COMMAND_DATA, data)
            .with(fields::MSGID, msgid)
    }

    // ── Map access ───────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    // ── Inbound accessors ────────────────────────────────────────

    /// Correlating request id.
    pub fn msgid(&self) -> Option<&str> {
        self.str_field(fields::MSGID)
    }

    /// Raw `hResult` string.
    pub fn h_result(&self) -> Option<&str> {
        self.str_field(fields::RESULT)
    }

    /// `true` only when `hResult` is exactly `WFS_SUCCESS`.
    pub fn is_success(&self) -> bool {
        self.h_result() == Some(WFS_SUCCESS)
    }

    /// Whether a `message` marker is present at all.
    pub fn has_marker(&self) -> bool {
        self.contains(fields::MARKER)
    }

    /// The parsed marker; `None` if absent or not one the engine knows.
    pub fn marker(&self) -> Option<Marker> {
        self.str_field(fields::MARKER)
            .and_then(|m| Marker::try_from(m).ok())
    }

    pub fn command_code(&self) -> Option<&str> {
        self.str_field(fields::COMMAND_CODE)
    }

    pub fn function(&self) -> Option<Function> {
        self.str_field(fields::FUNCTION)
            .and_then(|f| Function::try_from(f).ok())
    }

    /// `RequestID` of a cancel frame.
    pub fn cancel_target(&self) -> Option<&str> {
        self.str_field(fields::REQUEST_ID)
    }

    /// Result payload (`lpBuffer`).
    pub fn buffer(&self) -> Option<&Value> {
        self.0.get(fields::BUFFER)
    }

    /// Result payload as a map; empty if missing or not an object.
    pub fn buffer_map(&self) -> Map<String, Value> {
        match self.buffer() {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    // ── Serialization ────────────────────────────────────────────

    /// Encode the frame body (without the length prefix).
    pub fn to_bytes(&self) -> Result<Vec<u8>, XfsError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Decode a frame body (without the length prefix).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XfsError> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

impl From<Map<String, Value>> for Frame {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("msgid", &self.msgid())
            .field("hResult", &self.h_result())
            .field("message", &self.get(fields::MARKER))
            .field("len", &self.0.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_ids_are_braced_and_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with('{') && a.ends_with('}'));
        assert_eq!(a.len(), 38);
        assert_ne!(a, b);
    }

    #[test]
    fn execute_frame_fields() {
        let f = Frame::execute("{1}", "WFS_CMD_CDM_DISPENSE", json!({"amount": 100}));
        assert_eq!(f.function(), Some(Function::Execute));
        assert_eq!(f.get(fields::COMMAND), Some(&json!("WFS_CMD_CDM_DISPENSE")));
        assert_eq!(f.get(fields::COMMAND_DATA), Some(&json!({"amount": 100})));
        assert_eq!(f.msgid(), Some("{1}"));
    }

    #[test]
    fn cancel_without_target_omits_request_id() {
        let f = Frame::cancel("{2}", None);
        assert_eq!(f.function(), Some(Function::Cancel));
        assert!(!f.contains(fields::REQUEST_ID));

        let f = Frame::cancel("{2}", Some(""));
        assert!(!f.contains(fields::REQUEST_ID));

        let f = Frame::cancel("{2}", Some("{1}"));
        assert_eq!(f.cancel_target(), Some("{1}"));
    }

    #[test]
    fn inbound_accessors() {
        let f = Frame::new()
            .with(fields::MSGID, "{9}")
            .with(fields::RESULT, WFS_SUCCESS)
            .with(fields::MARKER, "WFS_GETINFO_COMPLETE")
            .with(fields::BUFFER, json!({"state": "ready"}));
        assert!(f.is_success());
        assert!(f.has_marker());
        assert_eq!(f.marker(), Some(Marker::GetInfoComplete));
        assert_eq!(f.buffer_map()["state"], json!("ready"));
    }

    #[test]
    fn unknown_marker_is_present_but_unparsed() {
        let f = Frame::new().with(fields::MARKER, "WFS_TIMER_EVENT");
        assert!(f.has_marker());
        assert_eq!(f.marker(), None);
    }

    #[test]
    fn buffer_map_tolerates_non_objects() {
        let f = Frame::new().with(fields::BUFFER, json!([1, 2, 3]));
        assert!(f.buffer_map().is_empty());
        assert!(Frame::new().buffer_map().is_empty());
    }

    #[test]
    fn connection_lost_is_a_failure() {
        let f = Frame::connection_lost("{3}", "DISPENSE");
        assert!(!f.is_success());
        assert_eq!(f.h_result(), Some(WFS_ERR_CONNECTION_LOST));
        assert_eq!(f.command_code(), Some("DISPENSE"));
    }

    #[test]
    fn body_bytes_roundtrip() {
        let f = Frame::execute("{4}", "RESET", Value::Null);
        let parsed = Frame::from_bytes(&f.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, f);
        assert!(Frame::from_bytes(b"[1,2]").is_err());
    }
}
