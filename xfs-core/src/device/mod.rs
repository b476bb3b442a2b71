//! Device proxies: class tags, frame classification and the engine.

pub mod class;
pub mod dispatch;
mod proxy;

pub use class::DeviceClass;
pub use dispatch::{ExecuteStep, GetInfoStep};
pub use proxy::{DeviceProxy, DeviceProxyBuilder};
