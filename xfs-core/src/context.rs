//! Process-scoped state shared by proxies.
//!
//! Proxies constructed with the same `Arc<XfsContext>` share command
//! queues, the capability cache, the broadcast registry and the
//! warn-once set. Tests create a fresh context per case to start clean.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::cache::CapabilityCache;
use crate::registry::DeviceRegistry;
use crate::state::{CommandQueues, lock};

#[derive(Debug, Default)]
pub struct XfsContext {
    queues: CommandQueues,
    capabilities: CapabilityCache,
    registry: DeviceRegistry,
    warned: Mutex<HashSet<String>>,
}

impl XfsContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queues(&self) -> &CommandQueues {
        &self.queues
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Returns `true` the first time it is called for `identity`.
    pub fn warn_once(&self, identity: &str) -> bool {
        lock(&self.warned).insert(identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_per_identity() {
        let ctx = XfsContext::new();
        assert!(ctx.warn_once("D1"));
        assert!(!ctx.warn_once("D1"));
        assert!(ctx.warn_once("D2"));
    }

    #[test]
    fn contexts_are_isolated() {
        let a = XfsContext::new();
        let b = XfsContext::new();
        a.capabilities()
            .store("D1", serde_json::Map::from_iter([("k".into(), 1.into())]));
        assert!(b.capabilities().get("D1").is_none());
    }
}
