//! Capability cache shared by every proxy of a device identity.
//!
//! Entries are filled lazily by the first `capabilities()` call and are
//! never invalidated implicitly. Writes are last-writer-wins: capability
//! data does not change for a given device.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::state::lock;

#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: Mutex<HashMap<String, Map<String, Value>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capabilities for `identity`; `None` if absent or empty.
    pub fn get(&self, identity: &str) -> Option<Map<String, Value>> {
        lock(&self.entries)
            .get(identity)
            .filter(|caps| !caps.is_empty())
            .cloned()
    }

    pub fn store(&self, identity: &str, capabilities: Map<String, Value>) {
        lock(&self.entries).insert(identity.to_string(), capabilities);
    }

    /// Forget the entry so the next read refetches it.
    pub fn invalidate(&self, identity: &str) -> bool {
        lock(&self.entries).remove(identity).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
