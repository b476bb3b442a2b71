//! Per-identity queues of commands the peer has accepted but not finished.
//!
//! Queue order is peer acceptance order. The head is the device's
//! "current" command: the one a target-less cancel acts on, and the
//! context attached to system events.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use super::lock;

/// One accepted, still running command.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedCommand {
    pub request_id: String,
    pub command_code: String,
    pub payload: Value,
    /// Proxy instance that issued the command.
    pub owner: u64,
}

/// Process-wide command queues keyed by device identity.
#[derive(Debug, Default)]
pub struct CommandQueues {
    queues: Mutex<HashMap<String, VecDeque<AcceptedCommand>>>,
}

impl CommandQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly accepted command.
    pub fn append(&self, identity: &str, command: AcceptedCommand) {
        lock(&self.queues)
            .entry(identity.to_string())
            .or_default()
            .push_back(command);
    }

    /// The oldest unfinished command for `identity`.
    pub fn current(&self, identity: &str) -> Option<AcceptedCommand> {
        lock(&self.queues)
            .get(identity)
            .and_then(|q| q.front().cloned())
    }

    /// Remove the command with `request_id`, wherever it sits in the queue.
    pub fn finish(&self, identity: &str, request_id: &str) -> Option<AcceptedCommand> {
        let mut queues = lock(&self.queues);
        let queue = queues.get_mut(identity)?;
        let pos = queue.iter().position(|c| c.request_id == request_id)?;
        let finished = queue.remove(pos);
        if queue.is_empty() {
            queues.remove(identity);
        }
        finished
    }

    /// Remove and return every command `owner` still has queued.
    pub fn drain_owner(&self, identity: &str, owner: u64) -> Vec<AcceptedCommand> {
        let mut queues = lock(&self.queues);
        let Some(queue) = queues.get_mut(identity) else {
            return Vec::new();
        };
        let (drained, kept): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|c| c.owner == owner);
        *queue = kept;
        if queue.is_empty() {
            queues.remove(identity);
        }
        drained.into()
    }

    /// Number of commands queued for `identity`.
    pub fn len(&self, identity: &str) -> usize {
        lock(&self.queues).get(identity).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, identity: &str) -> bool {
        self.len(identity) == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(id: &str, owner: u64) -> AcceptedCommand {
        AcceptedCommand {
            request_id: id.into(),
            command_code: "DISPENSE".into(),
            payload: json!({"id": id}),
            owner,
        }
    }

    #[test]
    fn current_is_oldest_accepted() {
        let queues = CommandQueues::new();
        assert!(queues.current("D1").is_none());

        queues.append("D1", cmd("{1}", 1));
        queues.append("D1", cmd("{2}", 1));
        assert_eq!(queues.current("D1").unwrap().request_id, "{1}");
        assert_eq!(queues.len("D1"), 2);
    }

    #[test]
    fn finish_removes_by_id_not_position() {
        let queues = CommandQueues::new();
        queues.append("D1", cmd("{1}", 1));
        queues.append("D1", cmd("{2}", 1));

        assert_eq!(queues.finish("D1", "{2}").unwrap().request_id, "{2}");
        assert_eq!(queues.current("D1").unwrap().request_id, "{1}");
        assert!(queues.finish("D1", "{2}").is_none());

        queues.finish("D1", "{1}");
        assert!(queues.is_empty("D1"));
    }

    #[test]
    fn identities_are_independent() {
        let queues = CommandQueues::new();
        queues.append("D1", cmd("{1}", 1));
        queues.append("D2", cmd("{2}", 2));
        assert_eq!(queues.current("D2").unwrap().request_id, "{2}");
        assert!(queues.finish("D1", "{2}").is_none());
    }

    #[test]
    fn drain_owner_keeps_other_instances() {
        let queues = CommandQueues::new();
        queues.append("D1", cmd("{1}", 1));
        queues.append("D1", cmd("{2}", 2));
        queues.append("D1", cmd("{3}", 1));

        let drained = queues.drain_owner("D1", 1);
        let ids: Vec<_> = drained.iter().map(|c| c.request_id.as_str()).collect();
        assert_eq!(ids, vec!["{1}", "{3}"]);
        assert_eq!(queues.len("D1"), 1);
        assert_eq!(queues.current("D1").unwrap().owner, 2);

        assert!(queues.drain_owner("D9", 1).is_empty());
    }
}
