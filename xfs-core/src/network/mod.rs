//! Transport layer: the connect-on-demand gate and the connectors it uses.

pub mod endpoint;
pub mod gate;
pub mod memory;

pub use endpoint::{Endpoint, SocketConnector};
pub use gate::{BoxedStream, Connector, DuplexStream, LinkEvent, TransportGate};
pub use memory::QueuedConnector;
