//! TFTP server errors

use crate::packet::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the server, dispatcher and connection drivers.
///
/// Wire-level failures (rejected requests, handler errors, peer errors) are
/// answered on the wire and never show up here; this type covers the local
/// socket and configuration failures the embedding application must see.
#[derive(Debug, Error)]
pub enum TftpError {
    /// Socket I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid server configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Protocol-level failure that could not be answered on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Reasons an inbound datagram on the listening port is not a usable request.
///
/// None of these produce a response; the datagram is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestParseError {
    /// Fewer than the two opcode bytes
    #[error("datagram too short for a TFTP opcode")]
    TooShort,

    /// Opcode other than RRQ or WRQ
    #[error("opcode {0} is not a read or write request")]
    UnsupportedOpcode(u16),

    /// No NUL terminator after the filename
    #[error("request filename is not NUL terminated")]
    MissingFilename,

    /// Mode missing, unterminated, or not `netascii`/`octet`
    #[error("request transfer mode is missing or unsupported")]
    InvalidMode,
}

/// Application-level failure reported back to the client as an ERROR packet.
///
/// Returned by [`RequestHandler`](crate::handler::RequestHandler) to reject a
/// request, and by [`Transfer`](crate::handler::Transfer) to abort a transfer
/// in progress. When `message` is `None` the connection's current error
/// message (initially `"Unknown error"`) is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {}", .message.as_deref().unwrap_or("no message"))]
pub struct TransferError {
    /// TFTP error code placed in the ERROR packet
    pub code: ErrorCode,
    /// Optional human-readable message placed in the ERROR packet
    pub message: Option<String>,
}

impl TransferError {
    /// Creates an error with a code and no message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self { code, message: None }
    }

    /// Creates an error with a code and message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// `File not found` (code 1).
    #[must_use]
    pub fn file_not_found() -> Self {
        Self::with_message(ErrorCode::FileNotFound, "File not found")
    }

    /// `Access violation` (code 2).
    #[must_use]
    pub fn access_violation(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::AccessViolation, message)
    }

    /// `Disk full or allocation exceeded` (code 3).
    #[must_use]
    pub fn disk_full() -> Self {
        Self::with_message(ErrorCode::DiskFull, "Disk full or allocation exceeded")
    }

    /// `Illegal TFTP operation` (code 4).
    #[must_use]
    pub fn illegal_operation() -> Self {
        Self::with_message(ErrorCode::IllegalOperation, "Illegal TFTP operation")
    }

    /// `File already exists` (code 6).
    #[must_use]
    pub fn file_exists() -> Self {
        Self::with_message(ErrorCode::FileExists, "File already exists")
    }
}
