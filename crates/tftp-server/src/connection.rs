//! Per-transfer state machine.
//!
//! A [`Connection`] exists for every accepted request. It owns the endpoint
//! connected to the client and the application's [`Transfer`], and reacts to
//! each datagram the client sends:
//!
//! - **Read** (`AwaitingAck`): an ACK for block `n` triggers DATA block
//!   `n + 1` while `n * 512 <= size`. The boundary is inclusive so a file
//!   whose length is a multiple of 512 ends with an empty block.
//! - **Write** (`AwaitingData`): every DATA block is handed to the transfer
//!   segment by segment and acknowledged. A datagram shorter than
//!   `512 + 4` bytes is the last one.
//! - An ERROR from the client closes the connection without reply.
//!
//! There is no retransmission timer; the client drives retries. Closing is
//! idempotent and also happens on drop, so the transfer's close callback
//! runs exactly once on every path.

use crate::buffer::Datagram;
use crate::error::{TftpError, TransferError};
use crate::handler::{CloseReason, Request, Transfer};
use crate::packet::{self, BLOCK_SIZE, DEFAULT_ERROR_MESSAGE, Direction, ErrorCode, HEADER_LEN, Opcode, TransferMode};
use crate::transport::Endpoint;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

const BLOCK_LEN: u64 = BLOCK_SIZE as u64;

/// Where a connection is in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Read transfer: DATA sent, waiting for the client's ACK
    AwaitingAck,
    /// Write transfer: ACK sent, waiting for the client's next DATA
    AwaitingData,
    /// Terminal; further datagrams are ignored
    Closed,
}

/// One in-progress transfer.
pub struct Connection {
    endpoint: Box<dyn Endpoint>,
    transfer: Box<dyn Transfer>,
    direction: Direction,
    mode: TransferMode,
    filename: String,
    state: ConnectionState,
    // Unwrapped index of the current block; the wire carries its low 16 bits.
    block: u64,
    // Reads: total bytes to send.
    size: u64,
    // Writes: bytes handed to put_data for the current block.
    block_bytes: u64,
    bytes_transferred: u64,
    error_message: String,
    strict_opcodes: bool,
    idle_timeout: Option<Duration>,
}

impl Connection {
    pub(crate) fn new(
        endpoint: Box<dyn Endpoint>,
        transfer: Box<dyn Transfer>,
        request: &Request,
        strict_opcodes: bool,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let state = match request.direction {
            Direction::Read => ConnectionState::AwaitingAck,
            Direction::Write => ConnectionState::AwaitingData,
        };
        let size = transfer.size();
        Self {
            endpoint,
            transfer,
            direction: request.direction,
            mode: request.mode,
            filename: request.filename.clone(),
            state,
            block: 0,
            size,
            block_bytes: 0,
            bytes_transferred: 0,
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
            strict_opcodes,
            idle_timeout,
        }
    }

    /// Sends the opening packet: DATA block 1 for a read, ACK block 0 for a
    /// write.
    pub(crate) async fn start(&mut self) {
        match self.direction {
            Direction::Read => {
                self.block = 1;
                self.send_data_block().await;
            }
            Direction::Write => {
                self.block = 0;
                send(self.endpoint.as_ref(), &packet::encode_ack(0)).await;
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Read or write.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Transfer mode from the request.
    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Filename from the request.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Client address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.endpoint.peer_addr()
    }

    /// Current block number as carried on the wire.
    #[must_use]
    pub fn block(&self) -> u16 {
        wire_block(self.block)
    }

    /// Highest file offset sent or received so far.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Message placed in the next ERROR packet this side sends.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Replaces the message used in ERROR packets.
    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    /// Receives and handles datagrams until the connection closes.
    ///
    /// A receive error closes the connection and is returned.
    pub async fn run(mut self) -> Result<(), TftpError> {
        while !self.is_closed() {
            let received = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.endpoint.recv()).await {
                    Ok(received) => received,
                    Err(_elapsed) => {
                        warn!(
                            "Transfer of {} with {} idle for {:?}, closing",
                            self.filename,
                            self.peer_addr(),
                            limit
                        );
                        self.close(CloseReason::TimedOut);
                        break;
                    }
                },
                None => self.endpoint.recv().await,
            };

            match received {
                Ok(datagram) => self.handle_datagram(&datagram).await,
                Err(e) => {
                    warn!("Receive failed for transfer of {}: {}", self.filename, e);
                    self.close(CloseReason::Aborted);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Processes one datagram received on this transfer's endpoint.
    pub async fn handle_datagram(&mut self, datagram: &Datagram) {
        if self.is_closed() {
            debug!("Ignoring datagram for closed transfer of {}", self.filename);
            return;
        }

        let Some(raw_opcode) = datagram.opcode() else {
            self.on_unexpected(None).await;
            return;
        };

        match (Opcode::try_from(raw_opcode), self.direction) {
            (Ok(Opcode::Ack), Direction::Read) => match datagram.header() {
                Some([_, _, hi, lo]) => self.on_ack(u16::from_be_bytes([hi, lo])).await,
                None => self.on_unexpected(Some(raw_opcode)).await,
            },
            (Ok(Opcode::Data), Direction::Write) => match datagram.header() {
                Some([_, _, hi, lo]) => self.on_data(u16::from_be_bytes([hi, lo]), datagram).await,
                None => self.on_unexpected(Some(raw_opcode)).await,
            },
            (Ok(Opcode::Error), _) => self.on_peer_error(datagram),
            _ => self.on_unexpected(Some(raw_opcode)).await,
        }
    }

    async fn on_ack(&mut self, wire: u16) {
        let acked = unwrap_block(self.block, wire);
        debug!("ACK {} for {}", wire, self.filename);

        if acked * BLOCK_LEN <= self.size {
            self.block = acked + 1;
            self.send_data_block().await;
        } else {
            info!(
                "Sent {} to {} ({} bytes)",
                self.filename,
                self.peer_addr(),
                self.bytes_transferred
            );
            self.close(CloseReason::Completed);
        }
    }

    async fn on_data(&mut self, wire: u16, datagram: &Datagram) {
        let block = unwrap_block(self.block + 1, wire);
        let base = block.saturating_sub(1) * BLOCK_LEN;
        self.block = block;
        self.block_bytes = 0;

        for segment in datagram.payload_segments(HEADER_LEN) {
            let offset = base + self.block_bytes;
            if let Err(err) = self.transfer.put_data(wire, offset, segment).await {
                self.fail(err).await;
                return;
            }
            self.block_bytes += segment.len() as u64;
        }
        self.bytes_transferred = self.bytes_transferred.max(base + self.block_bytes);
        debug!("DATA {} for {} ({} bytes)", wire, self.filename, self.block_bytes);

        send(self.endpoint.as_ref(), &packet::encode_ack(wire)).await;

        if datagram.len() < BLOCK_SIZE + HEADER_LEN {
            info!(
                "Received {} from {} ({} bytes)",
                self.filename,
                self.peer_addr(),
                self.bytes_transferred
            );
            self.close(CloseReason::Completed);
        }
    }

    fn on_peer_error(&mut self, datagram: &Datagram) {
        let code = datagram
            .header()
            .map_or(ErrorCode::NotDefined, |[_, _, hi, lo]| ErrorCode::from_u16(u16::from_be_bytes([hi, lo])));
        let bytes = datagram.to_vec();
        let message = bytes
            .get(HEADER_LEN..)
            .map(|rest| {
                let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                String::from_utf8_lossy(&rest[..end]).into_owned()
            })
            .unwrap_or_default();
        warn!(
            "Client {} aborted transfer of {}: {} {}",
            self.peer_addr(),
            self.filename,
            code,
            message
        );
        self.close(CloseReason::PeerError(code));
    }

    async fn on_unexpected(&mut self, opcode: Option<u16>) {
        debug!(
            "Unexpected opcode {:?} on {} transfer of {}",
            opcode, self.direction, self.filename
        );
        if self.strict_opcodes {
            self.fail(TransferError::illegal_operation()).await;
        }
    }

    async fn send_data_block(&mut self) {
        let offset = (self.block - 1) * BLOCK_LEN;
        let remaining = self.size.saturating_sub(offset).min(BLOCK_LEN);
        let len = usize::try_from(remaining).unwrap_or(BLOCK_SIZE);
        let wire = wire_block(self.block);

        let mut data = packet::data_packet(wire, len);
        match self.transfer.get_data(wire, offset, &mut data[HEADER_LEN..]).await {
            Ok(()) => {
                debug!("DATA {} for {} ({} bytes)", wire, self.filename, len);
                send(self.endpoint.as_ref(), &data).await;
                self.bytes_transferred = self.bytes_transferred.max(offset + remaining);
            }
            Err(err) => self.fail(err).await,
        }
    }

    /// Sends ERROR and closes.
    async fn fail(&mut self, err: TransferError) {
        if let Some(message) = err.message {
            self.error_message = message;
        }
        warn!(
            "Aborting transfer of {} with {}: {} {}",
            self.filename,
            self.peer_addr(),
            err.code,
            self.error_message
        );
        let packet = packet::encode_error(err.code, &self.error_message);
        send(self.endpoint.as_ref(), &packet).await;
        self.close(CloseReason::Failed(err.code));
    }

    fn close(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed;
        debug!("Closing transfer of {} ({:?})", self.filename, reason);
        self.transfer.close(reason);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(CloseReason::Aborted);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.endpoint.peer_addr())
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("filename", &self.filename)
            .field("state", &self.state)
            .field("block", &self.block)
            .field("size", &self.size)
            .field("bytes_transferred", &self.bytes_transferred)
            .finish_non_exhaustive()
    }
}

// Send failures are not retried; the client's own timeout covers them.
async fn send(endpoint: &dyn Endpoint, packet: &[u8]) {
    if let Err(e) = endpoint.send(packet).await {
        warn!("Failed to send to {}: {}", endpoint.peer_addr(), e);
    }
}

#[allow(clippy::cast_possible_truncation, reason = "the wire carries the low 16 bits")]
fn wire_block(index: u64) -> u16 {
    index as u16
}

/// Maps a 16-bit wire block number to the index nearest `reference`, so
/// transfers keep working after the counter rolls over.
#[allow(clippy::cast_possible_wrap, reason = "signed distance between two 16-bit counters")]
fn unwrap_block(reference: u64, wire: u16) -> u64 {
    let delta = wire.wrapping_sub(wire_block(reference)) as i16;
    reference
        .checked_add_signed(i64::from(delta))
        .unwrap_or(u64::from(wire))
}
