//! Message-framed duplex connection owned by a single test phase.
//!
//! A [`Connection`] is a pair of channels plus a counter of outbound bytes
//! that have been queued but not yet written to the wire. The transport side
//! (a WebSocket pump, or a [`PeerHandle`] in tests) drains the outbound channel
//! and feeds the inbound one.

use super::protocol::{self, ClientMessage, CLOSE_NORMAL};
use super::{SpeedTestError, TestPhase};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const INBOUND_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Close code, or `None` when the stream ended without a close frame.
    Closed(Option<u16>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close(u16),
}

/// Opens one connection per phase.
pub trait Connector {
    fn connect(
        &self,
        phase: TestPhase,
    ) -> impl Future<Output = Result<Connection, SpeedTestError>> + Send;
}

#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::Receiver<Inbound>,
    backlog: Arc<AtomicUsize>,
    closed: bool,
}

impl Connection {
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::Receiver<Inbound>,
        backlog: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            backlog,
            closed: false,
        }
    }

    /// Bytes of binary payload queued but not yet written.
    pub fn buffered_amount(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    pub fn send_text(&self, text: String) -> Result<(), SpeedTestError> {
        self.push(Outbound::Text(text))
    }

    pub fn send_json(&self, message: &ClientMessage) -> Result<(), SpeedTestError> {
        self.send_text(protocol::encode(message))
    }

    pub fn send_binary(&self, payload: Vec<u8>) -> Result<(), SpeedTestError> {
        let len = payload.len();
        self.backlog.fetch_add(len, Ordering::AcqRel);
        self.push(Outbound::Binary(payload)).inspect_err(|_| {
            release(&self.backlog, len);
        })
    }

    /// Next inbound event. `None` means the transport side is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    pub fn close(&mut self, code: u16) {
        if !self.closed {
            self.closed = true;
            let _ = self.outbound.send(Outbound::Close(code));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn push(&self, frame: Outbound) -> Result<(), SpeedTestError> {
        if self.closed {
            return Err(SpeedTestError::Transport("connection already closed".into()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| SpeedTestError::Transport("connection dropped".into()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(CLOSE_NORMAL);
    }
}

pub(crate) fn release(backlog: &AtomicUsize, len: usize) {
    let _ = backlog.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(len))
    });
}

/// Remote end of an in-memory connection.
#[derive(Debug)]
pub struct PeerHandle {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    backlog: Arc<AtomicUsize>,
}

/// In-memory connection, useful for driving a phase without a network.
pub fn pair() -> (Connection, PeerHandle) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let backlog = Arc::new(AtomicUsize::new(0));

    let connection = Connection::new(outbound_tx, inbound_rx, Arc::clone(&backlog));
    let peer = PeerHandle {
        inbound: inbound_tx,
        outbound: outbound_rx,
        backlog,
    };
    (connection, peer)
}

impl PeerHandle {
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.deliver(Inbound::Text(text.into())).await
    }

    pub async fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string()).await
    }

    pub async fn send_binary(&self, payload: Vec<u8>) -> bool {
        self.deliver(Inbound::Binary(payload)).await
    }

    pub async fn close(&self, code: Option<u16>) -> bool {
        self.deliver(Inbound::Closed(code)).await
    }

    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.deliver(Inbound::Error(reason.into())).await
    }

    /// Next frame written by the local side. Reading a binary frame drains
    /// it from the local backlog, as a socket write would.
    pub async fn recv(&mut self) -> Option<Outbound> {
        let frame = self.outbound.recv().await;
        self.account(frame.as_ref());
        frame
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        let frame = self.outbound.try_recv().ok();
        self.account(frame.as_ref());
        frame
    }

    /// Overrides the local side's view of unflushed bytes.
    pub fn set_backlog(&self, bytes: usize) {
        self.backlog.store(bytes, Ordering::Release);
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    async fn deliver(&self, event: Inbound) -> bool {
        self.inbound.send(event).await.is_ok()
    }

    fn account(&self, frame: Option<&Outbound>) {
        if let Some(Outbound::Binary(payload)) = frame {
            release(&self.backlog, payload.len());
        }
    }
}

/// Connector that hands the remote end of every new connection to a test
/// server task.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<(TestPhase, PeerHandle)>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(TestPhase, PeerHandle)>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        phase: TestPhase,
    ) -> impl Future<Output = Result<Connection, SpeedTestError>> + Send {
        let (connection, peer) = pair();
        let delivered = self.peers.send((phase, peer)).is_ok();
        async move {
            if delivered {
                Ok(connection)
            } else {
                Err(SpeedTestError::Transport(format!(
                    "no server accepting {phase} connections"
                )))
            }
        }
    }
}
