//! Application-facing callbacks.
//!
//! The server knows nothing about storage. When a request arrives it asks the
//! [`RequestHandler`] whether to proceed; an accepted request yields a
//! [`Transfer`] that supplies outgoing blocks (reads) or consumes incoming
//! ones (writes).

use crate::error::TransferError;
use crate::packet::{Direction, ErrorCode, TransferMode};
use async_trait::async_trait;
use std::net::SocketAddr;

/// A read or write request received on the listening port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// RRQ (`Read`) or WRQ (`Write`)
    pub direction: Direction,
    /// Filename exactly as the client sent it
    pub filename: String,
    /// Requested transfer mode
    pub mode: TransferMode,
    /// Client address and port (its transfer ID)
    pub peer: SocketAddr,
}

/// Decides whether incoming requests are served.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Accepts a request by returning the transfer that will serve it, or
    /// rejects it with the error code sent back to the client.
    async fn on_request(&self, request: &Request) -> Result<Box<dyn Transfer>, TransferError>;
}

/// Storage side of one accepted transfer.
#[async_trait]
pub trait Transfer: Send {
    /// Total number of bytes to send for a read. Ignored for writes.
    fn size(&self) -> u64 {
        0
    }

    /// Fills `buf` with the file bytes starting at `offset`, for DATA block
    /// `block`. `buf.len()` is exactly the payload length of that block.
    async fn get_data(&mut self, block: u16, offset: u64, buf: &mut [u8]) -> Result<(), TransferError> {
        let _ = (block, offset, buf);
        Err(TransferError::illegal_operation())
    }

    /// Stores `data`, which belongs at file position `offset` and arrived in
    /// DATA block `block`. Called once per received buffer segment.
    async fn put_data(&mut self, block: u16, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let _ = (block, offset, data);
        Err(TransferError::illegal_operation())
    }

    /// Called exactly once when the connection closes, whatever the reason.
    fn close(&mut self, reason: CloseReason) {
        let _ = reason;
    }
}

/// Why a connection closed, reported to [`Transfer::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Final block exchanged
    Completed,
    /// This side sent an ERROR packet with the given code
    Failed(ErrorCode),
    /// The client sent an ERROR packet
    PeerError(ErrorCode),
    /// Nothing arrived within the configured idle timeout
    TimedOut,
    /// Dropped before completion (server shutdown or endpoint failure)
    Aborted,
}

impl CloseReason {
    /// True only for a transfer that ran to completion.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Completed
    }
}
