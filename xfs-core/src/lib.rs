//! # xfs-core
//!
//! Client-side correlation engine for XFS-style device backends (card
//! readers, cash dispensers, PIN pads) reached over a framed duplex stream.
//!
//! This crate contains:
//! - **Frames**: `Frame`, an opaque JSON map with typed accessors, and the
//!   wire vocabulary in `message` (`Function`, `Marker`, result codes)
//! - **Codec**: `XfsCodec`, length-prefixed JSON framing via `tokio_util`
//! - **Network**: `TransportGate` (connect-on-demand link with one I/O
//!   task), `SocketConnector` for Unix/TCP endpoints, `QueuedConnector`
//!   for in-process peers
//! - **State**: the pending request table, per-identity command queues and
//!   the connection phase machine
//! - **Device**: `DeviceProxy`, which issues requests, routes replies,
//!   handles cancellation and caches capabilities
//! - **Context**: `XfsContext`, the process-wide queues, capability cache
//!   and device registry shared by proxies
//! - **Error**: `XfsError`, a `thiserror`-based error enum

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;
pub mod message;
pub mod network;
pub mod registry;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use cache::CapabilityCache;
pub use codec::{MAX_FRAME_SIZE, XfsCodec};
pub use config::ProxyConfig;
pub use context::XfsContext;
pub use device::{DeviceClass, DeviceProxy, DeviceProxyBuilder};
pub use error::XfsError;
pub use events::{DeviceEvent, EventHandler, NoopHandler};
pub use frame::{Frame, new_request_id};
pub use message::{EventClass, Function, Marker, WFS_ERR_CANCELED, WFS_ERR_CONNECTION_LOST, WFS_SUCCESS};
pub use network::{Connector, Endpoint, QueuedConnector, SocketConnector, TransportGate};
pub use registry::DeviceRegistry;
pub use state::{AcceptedCommand, ConnectionPhase, RequestState};
