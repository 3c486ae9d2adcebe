//! Request dispatcher.
//!
//! Classifies datagrams arriving on the listening port. Read and write
//! requests with a valid mode get a dedicated endpoint and are offered to
//! the application's [`RequestHandler`]; everything else is dropped without
//! a reply.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::TftpError;
use crate::handler::{Request, RequestHandler};
use crate::packet::{self, DEFAULT_ERROR_MESSAGE};
use crate::transport::Transport;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Turns requests into running connections.
///
/// The handler and transport are injected, so any number of dispatchers can
/// coexist in one process.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn RequestHandler>,
    transport: Arc<dyn Transport>,
    strict_opcodes: bool,
    idle_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Creates a dispatcher from its collaborators and the server settings.
    pub fn new(handler: Arc<dyn RequestHandler>, transport: Arc<dyn Transport>, config: &ServerConfig) -> Self {
        Self {
            handler,
            transport,
            strict_opcodes: config.strict_opcodes,
            idle_timeout: config.idle_timeout(),
        }
    }

    /// Handles one datagram received on the listening port.
    ///
    /// Returns the new connection when the request was accepted, `None` when
    /// it was dropped or rejected. Only a failure to open the transfer
    /// endpoint is an error.
    pub async fn dispatch(&self, packet: &[u8], peer: SocketAddr) -> Result<Option<Connection>, TftpError> {
        let parsed = match packet::parse_request(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", peer, e);
                return Ok(None);
            }
        };

        let request = Request {
            direction: parsed.direction,
            filename: parsed.filename,
            mode: parsed.mode,
            peer,
        };
        debug!(
            "{} request for {} ({}) from {}",
            request.direction, request.filename, request.mode, peer
        );

        let endpoint = self.transport.open(peer).await.map_err(|e| {
            warn!("Failed to open transfer endpoint for {}: {}", peer, e);
            TftpError::Io(e)
        })?;

        match self.handler.on_request(&request).await {
            Ok(transfer) => {
                info!(
                    "Accepted {} of {} ({}) from {}",
                    request.direction, request.filename, request.mode, peer
                );
                let mut connection = Connection::new(
                    endpoint,
                    transfer,
                    &request,
                    self.strict_opcodes,
                    self.idle_timeout,
                );
                connection.start().await;
                if connection.is_closed() {
                    return Ok(None);
                }
                Ok(Some(connection))
            }
            Err(rejection) => {
                let message = rejection.message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE);
                info!(
                    "Rejected {} of {} from {}: {} {}",
                    request.direction, request.filename, peer, rejection.code, message
                );
                let reply = packet::encode_error(rejection.code, message);
                if let Err(e) = endpoint.send(&reply).await {
                    warn!("Failed to send error to {}: {}", peer, e);
                }
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("strict_opcodes", &self.strict_opcodes)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}
