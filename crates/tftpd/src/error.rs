//! Daemon error types.
//!
//! Protocol and socket failures come from [`tftp_server::TftpError`]; this
//! module only adds what is specific to running the daemon.

use tftp_server::TftpError;
use thiserror::Error;

/// Errors that can stop the TFTP daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be read or failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listening socket or server loop failure
    #[error("TFTP server error: {0}")]
    Server(#[from] TftpError),
}
