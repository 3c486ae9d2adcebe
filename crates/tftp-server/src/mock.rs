//! In-memory transport and handlers for unit testing
//!
//! These mocks let the dispatcher and connection state machine run without
//! sockets or storage:
//! - [`MockTransport`] hands out [`MockEndpoint`]s and keeps a
//!   [`MockEndpointHandle`] for each so tests can inspect what was sent and
//!   feed datagrams back in.
//! - [`MockRequestHandler`] answers requests from a queue of scripted
//!   responses and records every request it saw.
//! - [`MockTransfer`] serves a byte buffer for reads, records writes, and can
//!   be told to fail on a given block. Its [`TransferProbe`] stays with the
//!   test after the transfer itself is boxed away.

use crate::buffer::Datagram;
use crate::error::TransferError;
use crate::handler::{CloseReason, Request, RequestHandler, Transfer};
use crate::transport::{Endpoint, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport recording every endpoint it opens.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    endpoints: Arc<Mutex<Vec<MockEndpointHandle>>>,
    fail_open: bool,
}

impl MockTransport {
    /// Create a new mock transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose `open` always fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Handles for every endpoint opened so far, in order
    #[must_use]
    pub fn endpoints(&self) -> Vec<MockEndpointHandle> {
        lock(&self.endpoints).clone()
    }

    /// Number of endpoints opened so far
    #[must_use]
    pub fn opened(&self) -> usize {
        lock(&self.endpoints).len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, peer: SocketAddr) -> io::Result<Box<dyn Endpoint>> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "mock open failure"));
        }
        let (endpoint, handle) = MockEndpoint::new(peer);
        lock(&self.endpoints).push(handle);
        Ok(Box::new(endpoint))
    }
}

/// Endpoint that stores sent packets and replays queued datagrams.
#[derive(Debug)]
pub struct MockEndpoint {
    peer: SocketAddr,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

/// Test-side view of a [`MockEndpoint`].
#[derive(Debug, Clone)]
pub struct MockEndpointHandle {
    peer: SocketAddr,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    inbound: mpsc::UnboundedSender<Datagram>,
}

impl MockEndpoint {
    /// Create an endpoint and the handle that observes it
    #[must_use]
    pub fn new(peer: SocketAddr) -> (Self, MockEndpointHandle) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Self {
            peer,
            sent: Arc::clone(&sent),
            inbound: tokio::sync::Mutex::new(rx),
        };
        let handle = MockEndpointHandle {
            peer,
            sent,
            inbound: tx,
        };
        (endpoint, handle)
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn send(&self, packet: &[u8]) -> io::Result<()> {
        lock(&self.sent).push(packet.to_vec());
        Ok(())
    }

    async fn recv(&self) -> io::Result<Datagram> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "mock peer gone"))
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl MockEndpointHandle {
    /// Peer the endpoint was opened for
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Every packet sent so far
    #[must_use]
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// Removes and returns the packets sent so far
    #[must_use]
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Queues a datagram for the endpoint's next `recv`
    pub fn push(&self, datagram: impl Into<Datagram>) {
        // A dropped endpoint just means the connection already finished.
        let _ = self.inbound.send(datagram.into());
    }
}

/// Shared record of what happened to a [`MockTransfer`].
#[derive(Debug, Clone, Default)]
pub struct TransferProbe {
    reads: Arc<Mutex<Vec<(u16, u64, usize)>>>,
    writes: Arc<Mutex<Vec<(u16, u64, Vec<u8>)>>>,
    closes: Arc<Mutex<Vec<CloseReason>>>,
}

impl TransferProbe {
    /// `(block, offset, len)` of every `get_data` call
    #[must_use]
    pub fn reads(&self) -> Vec<(u16, u64, usize)> {
        lock(&self.reads).clone()
    }

    /// `(block, offset, bytes)` of every `put_data` call
    #[must_use]
    pub fn writes(&self) -> Vec<(u16, u64, Vec<u8>)> {
        lock(&self.writes).clone()
    }

    /// All bytes written, concatenated in call order
    #[must_use]
    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.writes)
            .iter()
            .flat_map(|(_, _, bytes)| bytes.iter().copied())
            .collect()
    }

    /// Every close notification received
    #[must_use]
    pub fn closes(&self) -> Vec<CloseReason> {
        lock(&self.closes).clone()
    }
}

/// Scripted transfer backed by an in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct MockTransfer {
    data: Vec<u8>,
    size: Option<u64>,
    fail_get: Option<(u16, TransferError)>,
    fail_put: Option<(u16, TransferError)>,
    probe: TransferProbe,
}

impl MockTransfer {
    /// Transfer that serves `data` to a reader
    #[must_use]
    pub fn reading(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Transfer that accepts a writer's data
    #[must_use]
    pub fn writing() -> Self {
        Self::default()
    }

    /// Report a size other than the buffer length; reads past the buffer
    /// are zero-filled
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Fail `get_data` for `block`
    #[must_use]
    pub fn fail_get_at(mut self, block: u16, error: TransferError) -> Self {
        self.fail_get = Some((block, error));
        self
    }

    /// Fail `put_data` for `block`
    #[must_use]
    pub fn fail_put_at(mut self, block: u16, error: TransferError) -> Self {
        self.fail_put = Some((block, error));
        self
    }

    /// Handle for inspecting this transfer after it is handed over
    #[must_use]
    pub fn probe(&self) -> TransferProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Transfer for MockTransfer {
    fn size(&self) -> u64 {
        self.size.unwrap_or(self.data.len() as u64)
    }

    async fn get_data(&mut self, block: u16, offset: u64, buf: &mut [u8]) -> Result<(), TransferError> {
        lock(&self.probe.reads).push((block, offset, buf.len()));
        if let Some((failing, error)) = &self.fail_get {
            if *failing == block {
                return Err(error.clone());
            }
        }
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let available = &self.data[start..];
        let copied = available.len().min(buf.len());
        buf[..copied].copy_from_slice(&available[..copied]);
        buf[copied..].fill(0);
        Ok(())
    }

    async fn put_data(&mut self, block: u16, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        if let Some((failing, error)) = &self.fail_put {
            if *failing == block {
                return Err(error.clone());
            }
        }
        lock(&self.probe.writes).push((block, offset, data.to_vec()));
        Ok(())
    }

    fn close(&mut self, reason: CloseReason) {
        lock(&self.probe.closes).push(reason);
    }
}

/// Request handler answering from a queue of scripted responses.
///
/// Requests arriving after the queue is empty are rejected with
/// `FileNotFound`.
#[derive(Debug, Clone, Default)]
pub struct MockRequestHandler {
    responses: Arc<Mutex<VecDeque<Result<MockTransfer, TransferError>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockRequestHandler {
    /// Create a handler with no scripted responses
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an acceptance served by `transfer`
    pub fn accept(&self, transfer: MockTransfer) {
        lock(&self.responses).push_back(Ok(transfer));
    }

    /// Queue a rejection
    pub fn reject(&self, error: TransferError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Every request seen so far
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl RequestHandler for MockRequestHandler {
    async fn on_request(&self, request: &Request) -> Result<Box<dyn Transfer>, TransferError> {
        lock(&self.requests).push(request.clone());
        let response = lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransferError::file_not_found()));
        response.map(|transfer| Box::new(transfer) as Box<dyn Transfer>)
    }
}
