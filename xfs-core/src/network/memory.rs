//! In-process connector backed by `tokio::io::duplex` pairs.
//!
//! Each `connect()` pops the next queued stream; an empty queue refuses
//! the connection. Clones share one queue, so a handle kept outside the
//! proxy can feed reconnects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::DuplexStream as MemoryStream;

use super::gate::{BoxedStream, Connector, DuplexStream};
use crate::state::lock;

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone, Default)]
pub struct QueuedConnector {
    streams: Arc<Mutex<VecDeque<BoxedStream>>>,
}

impl QueuedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream for the next connect.
    pub fn push(&self, stream: impl DuplexStream) {
        lock(&self.streams).push_back(Box::new(stream));
    }

    /// Queue one end of a fresh pipe and return the other (the peer side).
    pub fn push_pair(&self) -> MemoryStream {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.push(ours);
        theirs
    }
}

#[async_trait]
impl Connector for QueuedConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        lock(&self.streams).pop_front().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no in-memory stream queued",
            )
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
