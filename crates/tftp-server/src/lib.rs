//! TFTP Server
//!
//! RFC 1350 Trivial File Transfer Protocol server core. Storage is left to
//! the embedding application through the [`RequestHandler`] and
//! [`Transfer`] traits; the network is reached through the [`Transport`]
//! and [`Endpoint`] traits, with a tokio UDP implementation provided.
//!
//! This crate provides:
//! - Packet codec for RRQ, WRQ, DATA, ACK and ERROR
//! - Request dispatcher for the listening port
//! - Per-transfer state machine with 512-byte lockstep blocks
//! - Server loop running each transfer in its own task
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tftp_server::{
//!     Request, RequestHandler, ServerConfig, TftpServer, Transfer, TransferError,
//! };
//!
//! struct Greeting;
//!
//! #[async_trait::async_trait]
//! impl Transfer for Greeting {
//!     fn size(&self) -> u64 {
//!         6
//!     }
//!
//!     async fn get_data(&mut self, _block: u16, _offset: u64, buf: &mut [u8]) -> Result<(), TransferError> {
//!         buf.copy_from_slice(&b"hello\n"[..buf.len()]);
//!         Ok(())
//!     }
//! }
//!
//! struct Handler;
//!
//! #[async_trait::async_trait]
//! impl RequestHandler for Handler {
//!     async fn on_request(&self, request: &Request) -> Result<Box<dyn Transfer>, TransferError> {
//!         match request.filename.as_str() {
//!             "greeting.txt" => Ok(Box::new(Greeting)),
//!             _ => Err(TransferError::file_not_found()),
//!         }
//!     }
//! }
//!
//! # async fn example() -> Result<(), tftp_server::TftpError> {
//! let server = TftpServer::bind(ServerConfig::default(), Arc::new(Handler)).await?;
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Behavior notes
//!
//! - There is no retransmission timer. Clients drive retries; an optional
//!   idle timeout only reclaims abandoned transfers.
//! - Unexpected opcodes on a transfer are ignored unless
//!   [`ServerConfig::strict_opcodes`] is set.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod packet;
pub mod server;
pub mod transport;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;


pub use buffer::Datagram;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState};
pub use dispatcher::Dispatcher;
pub use error::{RequestParseError, TftpError, TransferError};
pub use handler::{CloseReason, Request, RequestHandler, Transfer};
pub use packet::{BLOCK_SIZE, Direction, ErrorCode, TFTP_PORT, TransferMode};
pub use server::TftpServer;
pub use transport::{Endpoint, Transport, UdpEndpoint, UdpTransport};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEndpoint, MockEndpointHandle, MockRequestHandler, MockTransfer, MockTransport, TransferProbe};
