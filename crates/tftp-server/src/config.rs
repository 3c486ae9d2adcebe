//! Server configuration.

use crate::error::TftpError;
use crate::packet::TFTP_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime settings for [`TftpServer`](crate::server::TftpServer).
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address of the listening socket.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Answer unexpected opcodes on a transfer with `Illegal TFTP operation`
    /// and close it, instead of ignoring them.
    #[serde(default)]
    pub strict_opcodes: bool,

    /// Close a transfer that receives nothing for this many seconds.
    /// `None` keeps transfers open until the client finishes or errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

fn default_bind_addr() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, TFTP_PORT).into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            strict_opcodes: false,
            idle_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, TftpError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), TftpError> {
        if self.idle_timeout_secs == Some(0) {
            return Err(TftpError::Configuration(
                "idleTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle timeout as a `Duration`, if enabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
