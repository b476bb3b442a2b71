//! Registry of live proxies, used to fan completions out to every proxy
//! bound to the same device identity.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::events::{DeviceEvent, EventSink};
use crate::frame::Frame;
use crate::state::lock;

#[derive(Debug)]
struct RegistryEntry {
    instance: u64,
    identity: String,
    sink: EventSink,
}

#[derive(Debug)]
pub struct DeviceRegistry {
    next_instance: AtomicU64,
    entries: Mutex<Vec<RegistryEntry>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self {
            next_instance: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proxy's event sink; returns its instance id.
    pub fn register(&self, identity: &str, sink: EventSink) -> u64 {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push(RegistryEntry {
            instance,
            identity: identity.to_string(),
            sink,
        });
        instance
    }

    pub fn deregister(&self, instance: u64) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|e| e.instance != instance);
        entries.len() != before
    }

    /// Instance ids currently bound to `identity`.
    pub fn members(&self, identity: &str) -> Vec<u64> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.identity == identity)
            .map(|e| e.instance)
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a [`DeviceEvent::Broadcast`] to every proxy bound to
    /// `identity`. Returns the number of proxies it was delivered to.
    pub fn broadcast(
        &self,
        identity: &str,
        message: &Frame,
        command_code: &str,
        payload: &Value,
    ) -> usize {
        let sinks: Vec<EventSink> = lock(&self.entries)
            .iter()
            .filter(|e| e.identity == identity)
            .map(|e| e.sink.clone())
            .collect();

        let mut delivered = 0;
        for sink in sinks {
            let event = DeviceEvent::Broadcast {
                message: message.clone(),
                command_code: command_code.to_string(),
                payload: payload.clone(),
            };
            if sink.send(event).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
