//! Per-proxy table of in-flight requests.
//!
//! Every outbound request (command, info query, cancel) is tracked here
//! from the moment it is written until its terminal frame arrives. Callers
//! that need to suspend on a request attach a `oneshot` waiter; resolving
//! the request hands each waiter a copy of the terminal frame.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::frame::Frame;
use crate::message::WFS_ERR_CANCELED;

// ── RequestState ─────────────────────────────────────────────────

/// Lifecycle of a tracked request.
///
/// ```text
///  Issued ──► Accepted ──► Completed | Cancelled
///    │                           ▲
///    └───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Written to the peer, no reply yet.
    Issued,
    /// Acknowledged by the peer and queued on the device.
    Accepted,
    /// Finished with any result other than a cancellation.
    Completed,
    /// Finished because it was cancelled.
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Terminal state implied by a completion frame.
    pub fn terminal_for(frame: &Frame) -> Self {
        if frame.h_result() == Some(WFS_ERR_CANCELED) {
            Self::Cancelled
        } else {
            Self::Completed
        }
    }
}

// ── RequestKind ──────────────────────────────────────────────────

/// What was sent, kept so replies can be checked and broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Execute { command_code: String, payload: Value },
    GetInfo { category: String },
    Cancel { target: Option<String> },
}

impl RequestKind {
    /// The command code / category recorded for this request; empty for
    /// cancels.
    pub fn command_code(&self) -> &str {
        match self {
            Self::Execute { command_code, .. } => command_code,
            Self::GetInfo { category } => category,
            Self::Cancel { .. } => "",
        }
    }
}

// ── TrackedRequest ───────────────────────────────────────────────

#[derive(Debug)]
pub struct TrackedRequest {
    pub kind: RequestKind,
    pub state: RequestState,
    /// Generation of the link the request was written on.
    pub link: u64,
    /// When the request was written.
    pub sent_at: Instant,
    waiters: Vec<oneshot::Sender<Frame>>,
}

/// A request removed from the table by its terminal frame.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub kind: RequestKind,
    pub state: RequestState,
    pub elapsed: Duration,
}

// ── PendingTable ─────────────────────────────────────────────────

/// Outstanding requests keyed by request id.
#[derive(Debug, Default)]
pub struct PendingTable {
    requests: HashMap<String, TrackedRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request written on link generation `link`.
    pub fn track(&mut self, request_id: &str, kind: RequestKind, link: u64) {
        self.requests.insert(
            request_id.to_string(),
            TrackedRequest {
                kind,
                state: RequestState::Issued,
                link,
                sent_at: Instant::now(),
                waiters: Vec::new(),
            },
        );
    }

    /// Track a request and attach a waiter for its terminal frame.
    pub fn track_with_waiter(
        &mut self,
        request_id: &str,
        kind: RequestKind,
        link: u64,
        waiter: oneshot::Sender<Frame>,
    ) {
        self.track(request_id, kind, link);
        self.add_waiter(request_id, waiter);
    }

    /// Attach a waiter to an already tracked request.
    ///
    /// Returns `false` (and drops the waiter) when the request is not
    /// pending, i.e. its terminal frame has already been handled.
    pub fn add_waiter(&mut self, request_id: &str, waiter: oneshot::Sender<Frame>) -> bool {
        match self.requests.get_mut(request_id) {
            Some(req) => {
                req.waiters.push(waiter);
                true
            }
            None => false,
        }
    }

    /// Move an `Issued` request to `Accepted`.
    ///
    /// Returns `false` for unknown requests and repeated acceptances.
    pub fn mark_accepted(&mut self, request_id: &str) -> bool {
        match self.requests.get_mut(request_id) {
            Some(req) if req.state == RequestState::Issued => {
                req.state = RequestState::Accepted;
                true
            }
            _ => false,
        }
    }

    /// Remove a request on its terminal frame and wake every waiter with
    /// a copy of that frame.
    pub fn resolve(&mut self, request_id: &str, frame: &Frame) -> Option<ResolvedRequest> {
        let req = self.requests.remove(request_id)?;
        for waiter in req.waiters {
            // A waiter that gave up (timeout, dropped future) is fine.
            let _ = waiter.send(frame.clone());
        }
        Some(ResolvedRequest {
            state: RequestState::terminal_for(frame),
            elapsed: req.sent_at.elapsed(),
            kind: req.kind,
        })
    }

    /// Drop a request without a terminal frame (failed write, abandoned
    /// wait). Waiters observe a closed channel.
    pub fn remove(&mut self, request_id: &str) -> Option<TrackedRequest> {
        self.requests.remove(request_id)
    }

    pub fn get(&self, request_id: &str) -> Option<&TrackedRequest> {
        self.requests.get(request_id)
    }

    pub fn is_request_pending(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// `(request id, command code)` of every request written on link
    /// generation `link` or earlier.
    pub fn snapshot_through(&self, link: u64) -> Vec<(String, String)> {
        self.requests
            .iter()
            .filter(|(_, req)| req.link <= link)
            .map(|(id, req)| (id.clone(), req.kind.command_code().to_string()))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────
