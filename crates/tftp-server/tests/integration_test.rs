//! Integration tests for the TFTP server over loopback UDP
//!
//! Each test binds a server on an ephemeral port and plays the client side
//! by hand with a plain UDP socket.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tftp_server::packet::{self, Opcode};
use tftp_server::{
    CloseReason, Direction, ErrorCode, Request, RequestHandler, ServerConfig, TftpServer, Transfer, TransferError,
    TransferMode,
};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

struct MemoryHandler {
    files: Files,
}

struct MemoryTransfer {
    name: String,
    files: Files,
    contents: Vec<u8>,
}

#[async_trait]
impl RequestHandler for MemoryHandler {
    async fn on_request(&self, request: &Request) -> Result<Box<dyn Transfer>, TransferError> {
        let files = self.files.lock().unwrap();
        let contents = match request.direction {
            Direction::Read => files.get(&request.filename).cloned().ok_or_else(TransferError::file_not_found)?,
            Direction::Write if files.contains_key(&request.filename) => return Err(TransferError::file_exists()),
            Direction::Write => Vec::new(),
        };
        Ok(Box::new(MemoryTransfer {
            name: request.filename.clone(),
            files: Arc::clone(&self.files),
            contents,
        }))
    }
}

#[async_trait]
impl Transfer for MemoryTransfer {
    fn size(&self) -> u64 {
        self.contents.len() as u64
    }

    async fn get_data(&mut self, _block: u16, offset: u64, buf: &mut [u8]) -> Result<(), TransferError> {
        let start = offset as usize;
        buf.copy_from_slice(&self.contents[start..start + buf.len()]);
        Ok(())
    }

    async fn put_data(&mut self, _block: u16, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let end = offset as usize + data.len();
        if self.contents.len() < end {
            self.contents.resize(end, 0);
        }
        self.contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn close(&mut self, reason: CloseReason) {
        if reason.is_success() {
            self.files
                .lock()
                .unwrap()
                .insert(self.name.clone(), std::mem::take(&mut self.contents));
        }
    }
}

struct TestServer {
    addr: SocketAddr,
    files: Files,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(files: &[(&str, Vec<u8>)]) -> Self {
        let files: Files = Arc::new(Mutex::new(
            files.iter().map(|(name, data)| ((*name).to_string(), data.clone())).collect(),
        ));
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        };
        let handler = Arc::new(MemoryHandler {
            files: Arc::clone(&files),
        });
        let server = TftpServer::bind(config, handler).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            server
                .serve_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            files,
            shutdown: Some(tx),
            task,
        }
    }

    fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 1024];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for the server")
        .unwrap();
    buf.truncate(len);
    (buf, from)
}

#[tokio::test]
async fn test_read_file_over_udp() {
    let contents: Vec<u8> = (0..1300u32).map(|i| (i % 256) as u8).collect();
    let server = TestServer::start(&[("pxelinux.0", contents.clone())]).await;
    let socket = client().await;

    let rrq = packet::encode_request(Direction::Read, "pxelinux.0", TransferMode::Octet);
    socket.send_to(&rrq, server.addr).await.unwrap();

    let mut received = Vec::new();
    let mut expected_block = 1u16;
    loop {
        let (datagram, from) = recv(&socket).await;
        assert_ne!(from, server.addr, "transfers run on their own port");
        assert_eq!(packet::decode_header(&datagram), Some((Opcode::Data, expected_block)));
        received.extend_from_slice(&datagram[4..]);
        socket.send_to(&packet::encode_ack(expected_block), from).await.unwrap();
        if datagram.len() < 516 {
            break;
        }
        expected_block += 1;
    }

    assert_eq!(expected_block, 3);
    assert_eq!(received, contents);
    server.stop().await;
}

#[tokio::test]
async fn test_write_file_over_udp() {
    let server = TestServer::start(&[]).await;
    let socket = client().await;
    let upload = vec![0x5Au8; 700];

    let wrq = packet::encode_request(Direction::Write, "upload.bin", TransferMode::Octet);
    socket.send_to(&wrq, server.addr).await.unwrap();

    let (ack, transfer_addr) = recv(&socket).await;
    assert_eq!(ack, packet::encode_ack(0));

    for (index, chunk) in upload.chunks(512).enumerate() {
        let block = u16::try_from(index + 1).unwrap();
        socket
            .send_to(&packet::encode_data(block, chunk), transfer_addr)
            .await
            .unwrap();
        let (ack, from) = recv(&socket).await;
        assert_eq!(from, transfer_addr);
        assert_eq!(ack, packet::encode_ack(block));
    }

    // The final ACK goes out just before the connection closes.
    let mut stored = None;
    for _ in 0..50 {
        stored = server.file("upload.bin");
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stored, Some(upload));
    server.stop().await;
}

#[tokio::test]
async fn test_missing_file_returns_error() {
    let server = TestServer::start(&[]).await;
    let socket = client().await;

    let rrq = packet::encode_request(Direction::Read, "nope", TransferMode::NetAscii);
    socket.send_to(&rrq, server.addr).await.unwrap();

    let (datagram, _) = recv(&socket).await;
    assert_eq!(datagram, packet::encode_error(ErrorCode::FileNotFound, "File not found"));
    server.stop().await;
}

#[tokio::test]
async fn test_existing_file_write_is_rejected() {
    let server = TestServer::start(&[("taken", b"old".to_vec())]).await;
    let socket = client().await;

    let wrq = packet::encode_request(Direction::Write, "taken", TransferMode::Octet);
    socket.send_to(&wrq, server.addr).await.unwrap();

    let (datagram, _) = recv(&socket).await;
    assert_eq!(packet::decode_header(&datagram), Some((Opcode::Error, 6)));
    assert_eq!(server.file("taken"), Some(b"old".to_vec()));
    server.stop().await;
}

#[tokio::test]
async fn test_garbage_on_listening_port_is_ignored() {
    let contents = b"still serving".to_vec();
    let server = TestServer::start(&[("f", contents.clone())]).await;
    let socket = client().await;

    socket.send_to(&packet::encode_ack(7), server.addr).await.unwrap();
    socket.send_to(b"\x00\x01f\x00bogus\x00", server.addr).await.unwrap();
    socket
        .send_to(&packet::encode_request(Direction::Read, "f", TransferMode::Octet), server.addr)
        .await
        .unwrap();

    // The first reply is the DATA for the valid request.
    let (datagram, from) = recv(&socket).await;
    assert_eq!(datagram, packet::encode_data(1, &contents));
    socket.send_to(&packet::encode_ack(1), from).await.unwrap();
    server.stop().await;
}
