//! Transport gate: connect-on-demand wrapper around one duplex stream.
//!
//! The gate owns at most one live link. Each link runs a reader task that
//! decodes inbound frames into [`LinkEvent::Frame`] and a writer task that
//! drains the outbound queue into the stream, so a write blocked on a full
//! stream never stops inbound decoding. When either task ends, or the gate
//! drops the link, the other is stopped and the link emits exactly one
//! [`LinkEvent::Disconnected`] tagged with its generation.
//!
//! [`TransportGate::ensure_connected`] is idempotent and is called before
//! every write; it reconnects when the previous link is gone. Connect
//! attempts are serialised on their own lock; link state sits behind a
//! short synchronous lock, so `send`, `is_connected` and `close` never
//! wait on a connect in progress.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::XfsCodec;
use crate::error::XfsError;
use crate::frame::Frame;
use crate::state::{ConnectionPhase, lock};

/// Default depth of the outbound frame queue.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 100;

/// Any byte stream the gate can frame.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn DuplexStream>;

type LinkSink = SplitSink<Framed<BoxedStream, XfsCodec>, Frame>;
type LinkStream = SplitStream<Framed<BoxedStream, XfsCodec>>;

/// Opens a fresh stream to the device server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> std::io::Result<BoxedStream>;

    /// Human-readable endpoint, for logs.
    fn describe(&self) -> String;
}

/// What a link reports to its owner.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Frame),
    Disconnected { generation: u64 },
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

#[derive(Debug, Default)]
struct Link {
    phase: ConnectionPhase,
    generation: u64,
    outbound: Option<mpsc::Sender<Frame>>,
}

impl Link {
    fn live_sender(&self) -> Option<&mpsc::Sender<Frame>> {
        self.outbound.as_ref().filter(|tx| !tx.is_closed())
    }

    fn live_generation(&self) -> Option<u64> {
        self.live_sender().map(|_| self.generation)
    }
}

pub struct TransportGate {
    connector: Box<dyn Connector>,
    link: Mutex<Link>,
    // Held across one connect attempt; callers queued behind it reuse the
    // link that attempt produced.
    connecting: AsyncMutex<()>,
    events: LinkEventSender,
    write_queue_depth: usize,
}

impl TransportGate {
    pub fn new(connector: Box<dyn Connector>, events: LinkEventSender) -> Self {
        Self {
            connector,
            link: Mutex::new(Link::default()),
            connecting: AsyncMutex::new(()),
            events,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
        }
    }

    pub fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth.max(1);
        self
    }

    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    /// Make sure a link is up, connecting if needed.
    ///
    /// Returns the generation of the live link.
    pub async fn ensure_connected(&self) -> Result<u64, XfsError> {
        if let Some(generation) = lock(&self.link).live_generation() {
            return Ok(generation);
        }

        let _attempt = self.connecting.lock().await;

        {
            let mut link = lock(&self.link);
            if let Some(generation) = link.live_generation() {
                return Ok(generation);
            }
            link.outbound = None;
            link.phase.force_disconnect();
            link.phase.begin_connect()?;
        }

        let result = self.connector.connect().await;

        let mut link = lock(&self.link);
        let stream = match result {
            Ok(stream) if link.phase.is_connecting() => stream,
            Ok(_) => {
                debug!("link closed while connecting");
                return Err(XfsError::NotConnected);
            }
            Err(e) => {
                link.phase.force_disconnect();
                return Err(XfsError::Connection(e));
            }
        };

        link.generation += 1;
        let generation = link.generation;
        let (tx, rx) = mpsc::channel(self.write_queue_depth);
        tokio::spawn(run_link(
            Framed::new(stream, XfsCodec),
            rx,
            self.events.clone(),
            generation,
        ));

        link.outbound = Some(tx);
        link.phase.complete_connect()?;
        info!(endpoint = %self.connector.describe(), generation, "link up");
        Ok(generation)
    }

    /// Queue a frame on the live link.
    pub async fn send(&self, frame: Frame) -> Result<(), XfsError> {
        let tx = lock(&self.link)
            .live_sender()
            .cloned()
            .ok_or(XfsError::NotConnected)?;
        tx.send(frame).await?;
        Ok(())
    }

    /// Drop the live link, if any. Its tasks report `Disconnected`.
    pub fn close(&self) {
        let mut link = lock(&self.link);
        link.outbound = None;
        link.phase.force_disconnect();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link).live_sender().is_some()
    }

    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.link).phase.clone()
    }
}

// ── Link tasks ───────────────────────────────────────────────────

/// Supervise one link: a reader and a writer over the split stream.
async fn run_link(
    framed: Framed<BoxedStream, XfsCodec>,
    outbound: mpsc::Receiver<Frame>,
    events: LinkEventSender,
    generation: u64,
) {
    let (sink, stream) = framed.split();
    let mut writer = tokio::spawn(write_frames(sink, outbound, generation));
    let mut reader = tokio::spawn(read_frames(stream, events.clone(), generation));

    // Whichever side ends first takes the other down. Awaiting the aborted
    // task drops its half, and with the writer its queue receiver, so the
    // queue is closed before the disconnect is reported.
    let writer_ended = tokio::select! {
        _ = &mut writer => true,
        _ = &mut reader => false,
    };
    let survivor = if writer_ended { reader } else { writer };
    survivor.abort();
    let _ = survivor.await;

    let _ = events.send(LinkEvent::Disconnected { generation });
    info!(generation, "link down");
}

/// Inbound frames → `events`, until the stream ends or the owner is gone.
async fn read_frames(mut stream: LinkStream, events: LinkEventSender, generation: u64) {
    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(frame) => {
                if events.send(LinkEvent::Frame(frame)).is_err() {
                    debug!(generation, "link owner gone");
                    return;
                }
            }
            Err(e) => {
                warn!(generation, "link read error: {e}");
                return;
            }
        }
    }
    debug!(generation, "peer closed the stream");
}

/// `outbound` → stream, until the gate drops the queue or a write fails.
async fn write_frames(mut sink: LinkSink, mut outbound: mpsc::Receiver<Frame>, generation: u64) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(generation, "link write error: {e}");
            return;
        }
    }
    debug!(generation, "link closed locally");
}
// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::QueuedConnector;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    fn gate_with(connector: QueuedConnector) -> (TransportGate, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransportGate::new(Box::new(connector), tx), rx)
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (gate, _rx) = gate_with(QueuedConnector::new());
        assert!(matches!(
            gate.ensure_connected().await,
            Err(XfsError::Connection(_))
        ));
        assert!(gate.phase().is_disconnected());
        assert!(matches!(
            gate.send(Frame::new()).await,
            Err(XfsError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn ensure_connected_is_idempotent() {
        let connector = QueuedConnector::new();
        let _peer = connector.push_pair();
        let (gate, _rx) = gate_with(connector);

        assert_eq!(gate.ensure_connected().await.unwrap(), 1);
        assert_eq!(gate.ensure_connected().await.unwrap(), 1);
        assert!(gate.phase().is_connected());
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let connector = QueuedConnector::new();
        let mut peer = Framed::new(connector.push_pair(), XfsCodec);
        let (gate, mut rx) = gate_with(connector);
        gate.ensure_connected().await.unwrap();

        gate.send(Frame::new().with("msgid", "{out}")).await.unwrap();
        let got = timeout(Duration::from_secs(5), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.msgid(), Some("{out}"));

        peer.send(Frame::new().with("msgid", "{in}")).await.unwrap();
        match timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            Some(LinkEvent::Frame(f)) => assert_eq!(f.msgid(), Some("{in}")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_close_reports_disconnect_and_reconnects() {
        let connector = QueuedConnector::new();
        let first = connector.push_pair();
        let _second = connector.push_pair();
        let (gate, mut rx) = gate_with(connector);

        assert_eq!(gate.ensure_connected().await.unwrap(), 1);
        drop(first);

        match timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            Some(LinkEvent::Disconnected { generation }) => assert_eq!(generation, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!gate.is_connected());
        assert_eq!(gate.ensure_connected().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn close_reports_disconnect() {
        let connector = QueuedConnector::new();
        let _peer = connector.push_pair();
        let (gate, mut rx) = gate_with(connector);
        gate.ensure_connected().await.unwrap();

        gate.close();
        assert!(matches!(
            timeout(Duration::from_secs(5), rx.recv()).await.unwrap(),
            Some(LinkEvent::Disconnected { generation: 1 })
        ));
    }

    #[tokio::test]
    async fn inbound_frames_flow_while_a_write_is_blocked() {
        let connector = QueuedConnector::new();
        let mut peer = Framed::new(connector.push_pair(), XfsCodec);
        let (gate, mut rx) = gate_with(connector);
        gate.ensure_connected().await.unwrap();

        // Larger than the pipe: the write stalls until the peer reads.
        let command = Frame::new()
            .with("msgid", "{big}")
            .with("lpBuffer", "c".repeat(256 * 1024));
        gate.send(command).await.unwrap();

        // The peer writes its own large event before reading anything.
        let event = Frame::new()
            .with("msgid", "{event}")
            .with("lpBuffer", "e".repeat(128 * 1024));
        timeout(Duration::from_secs(5), peer.send(event))
            .await
            .expect("peer write stalled")
            .unwrap();

        match timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
            Some(LinkEvent::Frame(f)) => assert_eq!(f.msgid(), Some("{event}")),
            other => panic!("unexpected {other:?}"),
        }

        let got = timeout(Duration::from_secs(5), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.msgid(), Some("{big}"));
    }

    #[tokio::test]
    async fn write_failure_reports_one_disconnect() {
        let connector = QueuedConnector::new();
        let peer = connector.push_pair();
        let (gate, mut rx) = gate_with(connector);
        gate.ensure_connected().await.unwrap();
        drop(peer);

        let _ = gate.send(Frame::new().with("msgid", "{late}")).await;
        assert!(matches!(
            timeout(Duration::from_secs(5), rx.recv()).await.unwrap(),
            Some(LinkEvent::Disconnected { generation: 1 })
        ));
        assert!(!gate.is_connected());
        assert!(
            timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
            "disconnect reported twice"
        );
    }

    /// Connects only when released, then refuses.
    struct HeldConnector(Arc<Notify>);

    #[async_trait]
    impl Connector for HeldConnector {
        async fn connect(&self) -> std::io::Result<BoxedStream> {
            self.0.notified().await;
            Err(std::io::ErrorKind::ConnectionRefused.into())
        }

        fn describe(&self) -> String {
            "held".to_string()
        }
    }

    #[tokio::test]
    async fn pending_connect_does_not_block_other_callers() {
        let release = Arc::new(Notify::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let gate = Arc::new(TransportGate::new(
            Box::new(HeldConnector(release.clone())),
            tx,
        ));

        let attempt = tokio::spawn({
            let gate = gate.clone();
            async move { gate.ensure_connected().await }
        });
        timeout(Duration::from_secs(5), async {
            while !gate.phase().is_connecting() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!gate.is_connected());
        assert!(matches!(
            timeout(Duration::from_secs(1), gate.send(Frame::new())).await,
            Ok(Err(XfsError::NotConnected))
        ));
        gate.close();

        release.notify_one();
        assert!(matches!(
            attempt.await.unwrap(),
            Err(XfsError::Connection(_))
        ));
        assert!(gate.phase().is_disconnected());
    }
}
