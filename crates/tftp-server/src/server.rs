//! Main TFTP server implementation.
//!
//! This module owns the listening socket on the well-known port, feeds
//! every inbound datagram to the [`Dispatcher`], and runs each accepted
//! transfer in its own tokio task until it closes.

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TftpError;
use crate::handler::RequestHandler;
use crate::transport::{MAX_DATAGRAM_SIZE, Transport, UdpTransport};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// TFTP server bound to its listening socket.
#[derive(Debug)]
pub struct TftpServer {
    socket: UdpSocket,
    dispatcher: Dispatcher,
}

impl TftpServer {
    /// Binds the listening socket and prepares a server using UDP transfer
    /// endpoints.
    pub async fn bind(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Result<Self, TftpError> {
        Self::bind_with_transport(config, handler, Arc::new(UdpTransport)).await
    }

    /// Same as [`TftpServer::bind`] with a custom transfer transport.
    pub async fn bind_with_transport(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TftpError> {
        config.validate()?;
        let socket = UdpSocket::bind(config.bind_addr).await?;
        info!("TFTP server listening on {}", socket.local_addr()?);

        let dispatcher = Dispatcher::new(handler, transport, &config);
        Ok(Self { socket, dispatcher })
    }

    /// Address of the listening socket.
    pub fn local_addr(&self) -> Result<SocketAddr, TftpError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves requests forever.
    pub async fn serve(self) -> Result<(), TftpError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves requests until `shutdown` completes, then aborts the transfers
    /// still in flight.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), TftpError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut transfers: JoinSet<Result<(), TftpError>> = JoinSet::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutting down TFTP server ({} transfers in flight)", transfers.len());
                    break;
                }
                Some(finished) = transfers.join_next(), if !transfers.is_empty() => {
                    match finished {
                        Ok(Ok(())) => debug!("Transfer task finished"),
                        Ok(Err(e)) => warn!("Transfer ended with error: {}", e),
                        Err(e) => error!("Transfer task panicked: {}", e),
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // ICMP port-unreachable from an earlier peer surfaces here on some platforms.
                            warn!("Receive on listening socket failed: {}", e);
                            continue;
                        }
                    };
                    match self.dispatcher.dispatch(&buf[..len], peer).await {
                        Ok(Some(connection)) => {
                            transfers.spawn(connection.run());
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Request from {} dropped: {}", peer, e),
                    }
                }
            }
        }

        // Aborting drops each connection, which fires its close notification.
        transfers.shutdown().await;
        Ok(())
    }
}
