//! Per-device proxy configuration.
//!
//! Deserialises with `#[serde(default)]`, so a config file only needs the
//! fields it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceClass;
use crate::error::XfsError;
use crate::network::Endpoint;
use crate::network::endpoint::DEFAULT_SOCKET_PREFIX;
use crate::network::gate::DEFAULT_WRITE_QUEUE_DEPTH;

/// Default capacity of a proxy's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Logical device name; scopes queues, cache and broadcast group.
    pub device_id: String,
    /// Three-character class tag, e.g. "CDM".
    pub device_class: String,
    /// "local", "unix://<path>", "tcp://<host>:<port>" or "ssl://<host>:<port>".
    pub address: String,
    /// Directory holding the per-device sockets for `local`.
    pub socket_dir: PathBuf,
    /// Socket name prefix for `local`; the device id is appended.
    pub socket_prefix: String,
    /// Upper bound on a blocking info query; 0 waits forever.
    pub get_info_timeout_ms: u64,
    /// Time allowed for one connect attempt.
    pub connect_timeout_ms: u64,
    /// Outbound frames buffered per link.
    pub write_queue_depth: usize,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            device_id: "CDM30".into(),
            device_class: "CDM".into(),
            address: "local".into(),
            socket_dir: PathBuf::from("/var/run/xfs"),
            socket_prefix: DEFAULT_SOCKET_PREFIX.into(),
            get_info_timeout_ms: 0,
            connect_timeout_ms: 30_000,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ProxyConfig {
    pub fn endpoint(&self) -> Result<Endpoint, XfsError> {
        Endpoint::parse(
            &self.address,
            &self.device_id,
            &self.socket_dir,
            &self.socket_prefix,
        )
    }

    pub fn class(&self) -> Result<DeviceClass, XfsError> {
        DeviceClass::new(&self.device_class)
    }

    pub fn get_info_timeout(&self) -> Option<Duration> {
        (self.get_info_timeout_ms > 0).then(|| Duration::from_millis(self.get_info_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: ProxyConfig =
            serde_json::from_str(r#"{"device_id": "IDC07", "device_class": "idc"}"#).unwrap();
        assert_eq!(cfg.device_id, "IDC07");
        assert_eq!(cfg.address, "local");
        assert_eq!(cfg.write_queue_depth, DEFAULT_WRITE_QUEUE_DEPTH);
        assert_eq!(cfg.class().unwrap().as_str(), "IDC");
        assert_eq!(
            cfg.endpoint().unwrap(),
            Endpoint::Local(PathBuf::from("/var/run/xfs/printec.ndc.device.IDC07"))
        );
    }

    #[test]
    fn socket_prefix_is_configurable() {
        let cfg: ProxyConfig = serde_json::from_str(
            r#"{"device_id": "PIN01", "socket_dir": "/tmp/xfs", "socket_prefix": "vendor.pin."}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.endpoint().unwrap(),
            Endpoint::Local(PathBuf::from("/tmp/xfs/vendor.pin.PIN01"))
        );
    }

    #[test]
    fn zero_timeout_waits_forever() {
        let mut cfg = ProxyConfig::default();
        assert_eq!(cfg.get_info_timeout(), None);
        cfg.get_info_timeout_ms = 1500;
        assert_eq!(cfg.get_info_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn bad_class_is_reported() {
        let cfg = ProxyConfig {
            device_class: "CDMX".into(),
            ..ProxyConfig::default()
        };
        assert!(matches!(cfg.class(), Err(XfsError::InvalidDeviceClass(_))));
    }
}
