//! Directory-backed request handler.
//!
//! Every filename is resolved beneath a single root directory. Reads stream
//! straight from the file at the block offset; writes land in place and a
//! transfer that does not complete removes what it wrote.

use async_trait::async_trait;
use std::io::{self, ErrorKind, SeekFrom};
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use tftp_server::{CloseReason, Direction, ErrorCode, Request, RequestHandler, Transfer, TransferError};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Serves files beneath `root`.
#[derive(Debug, Clone)]
pub struct DirectoryHandler {
    root: PathBuf,
    allow_write: bool,
    allow_overwrite: bool,
}

impl DirectoryHandler {
    /// Create a handler for `root`. Writes are refused unless `allow_write`
    /// is set; existing files are only replaced with `allow_overwrite`.
    pub fn new(root: impl Into<PathBuf>, allow_write: bool, allow_overwrite: bool) -> Self {
        Self {
            root: root.into(),
            allow_write,
            allow_overwrite,
        }
    }

    /// Maps a requested filename to a path under the root.
    ///
    /// Leading slashes are dropped, since many clients send absolute-looking
    /// names. Parent components are refused.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, TransferError> {
        let relative = Path::new(filename.trim_start_matches('/'));
        let mut path = self.root.clone();
        let mut named = false;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    named = true;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(TransferError::access_violation("Path outside served directory"));
                }
            }
        }

        if !named {
            return Err(TransferError::access_violation("No filename"));
        }
        Ok(path)
    }

    async fn open_read(&self, path: PathBuf, peer: SocketAddr) -> Result<Box<dyn Transfer>, TransferError> {
        let file = File::open(&path).await.map_err(|e| open_error(&path, &e))?;
        let metadata = file.metadata().await.map_err(|e| open_error(&path, &e))?;
        if !metadata.is_file() {
            return Err(TransferError::access_violation("Not a regular file"));
        }

        Ok(Box::new(FileReader {
            path,
            file,
            size: metadata.len(),
            peer,
        }))
    }

    async fn open_write(&self, path: PathBuf, peer: SocketAddr) -> Result<Box<dyn Transfer>, TransferError> {
        if !self.allow_write {
            return Err(TransferError::access_violation("Writes are disabled"));
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if self.allow_overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => TransferError::file_exists(),
            _ => open_error(&path, &e),
        })?;

        Ok(Box::new(FileWriter {
            path,
            file,
            peer,
            written: 0,
        }))
    }
}

#[async_trait]
impl RequestHandler for DirectoryHandler {
    async fn on_request(&self, request: &Request) -> Result<Box<dyn Transfer>, TransferError> {
        let path = self.resolve(&request.filename)?;
        match request.direction {
            Direction::Read => self.open_read(path, request.peer).await,
            Direction::Write => self.open_write(path, request.peer).await,
        }
    }
}

fn open_error(path: &Path, e: &io::Error) -> TransferError {
    match e.kind() {
        ErrorKind::NotFound => TransferError::file_not_found(),
        ErrorKind::PermissionDenied | ErrorKind::IsADirectory => TransferError::access_violation("Access denied"),
        _ => {
            warn!("Failed to open {}: {}", path.display(), e);
            TransferError::with_message(ErrorCode::NotDefined, "Cannot open file")
        }
    }
}

/// Read side of a transfer.
struct FileReader {
    path: PathBuf,
    file: File,
    size: u64,
    peer: SocketAddr,
}

#[async_trait]
impl Transfer for FileReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn get_data(&mut self, _block: u16, offset: u64, buf: &mut [u8]) -> Result<(), TransferError> {
        let result = async {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.file.read_exact(buf).await?;
            Ok::<(), io::Error>(())
        }
        .await;

        result.map_err(|e| {
            warn!("Read of {} at offset {} failed: {}", self.path.display(), offset, e);
            TransferError::with_message(ErrorCode::NotDefined, "Read failed")
        })
    }

    fn close(&mut self, reason: CloseReason) {
        if reason.is_success() {
            info!("Served {} to {} ({} bytes)", self.path.display(), self.peer, self.size);
        } else {
            warn!("Read of {} by {} ended early: {:?}", self.path.display(), self.peer, reason);
        }
    }
}

/// Write side of a transfer.
struct FileWriter {
    path: PathBuf,
    file: File,
    peer: SocketAddr,
    written: u64,
}

#[async_trait]
impl Transfer for FileWriter {
    async fn put_data(&mut self, _block: u16, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let result = async {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.file.write_all(data).await?;
            self.file.flush().await?;
            Ok::<(), io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.written = self.written.max(offset + data.len() as u64);
                Ok(())
            }
            Err(e) => {
                warn!("Write of {} at offset {} failed: {}", self.path.display(), offset, e);
                Err(TransferError::disk_full())
            }
        }
    }

    fn close(&mut self, reason: CloseReason) {
        if reason.is_success() {
            info!("Stored {} from {} ({} bytes)", self.path.display(), self.peer, self.written);
            return;
        }

        warn!(
            "Write of {} by {} ended early: {:?}; removing partial file",
            self.path.display(),
            self.peer,
            reason
        );
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tftp_server::TransferMode;

    fn request(direction: Direction, filename: &str) -> Request {
        Request {
            direction,
            filename: filename.to_string(),
            mode: TransferMode::Octet,
            peer: "192.0.2.1:2000".parse().unwrap(),
        }
    }

    async fn rejection(handler: &DirectoryHandler, direction: Direction, filename: &str) -> TransferError {
        let Err(err) = handler.on_request(&request(direction, filename)).await else {
            panic!("{filename} should have been rejected");
        };
        err
    }

    #[test]
    fn test_resolve_strips_leading_slash() {
        let handler = DirectoryHandler::new("/srv/tftp", false, false);
        assert_eq!(
            handler.resolve("/pxelinux.cfg/default").unwrap(),
            PathBuf::from("/srv/tftp/pxelinux.cfg/default")
        );
        assert_eq!(handler.resolve("./boot.img").unwrap(), PathBuf::from("/srv/tftp/boot.img"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let handler = DirectoryHandler::new("/srv/tftp", false, false);
        for name in ["../etc/passwd", "boot/../../secret", "/..", "", "/", "."] {
            let err = handler.resolve(name).unwrap_err();
            assert_eq!(err.code, ErrorCode::AccessViolation, "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_read_existing_file() {
        let dir = TempDir::new().unwrap();
        let contents: Vec<u8> = (0..1000u32).map(|i| (i % 200) as u8).collect();
        fs::write(dir.path().join("kernel"), &contents).unwrap();
        let handler = DirectoryHandler::new(dir.path(), false, false);

        let mut transfer = handler.on_request(&request(Direction::Read, "/kernel")).await.unwrap();
        assert_eq!(transfer.size(), 1000);

        let mut buf = vec![0u8; 488];
        transfer.get_data(2, 512, &mut buf).await.unwrap();
        assert_eq!(buf, &contents[512..]);

        let mut buf = vec![0u8; 512];
        transfer.get_data(1, 0, &mut buf).await.unwrap();
        assert_eq!(buf, &contents[..512]);
        transfer.close(CloseReason::Completed);
    }

    #[tokio::test]
    async fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("short"), b"abc").unwrap();
        let handler = DirectoryHandler::new(dir.path(), false, false);

        let mut transfer = handler.on_request(&request(Direction::Read, "short")).await.unwrap();
        let mut buf = vec![0u8; 10];
        let err = transfer.get_data(1, 0, &mut buf).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotDefined);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(dir.path(), false, false);

        let err = rejection(&handler, Direction::Read, "missing.bin").await;
        assert_eq!(err, TransferError::file_not_found());
    }

    #[tokio::test]
    async fn test_read_directory_is_refused() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pxelinux.cfg")).unwrap();
        let handler = DirectoryHandler::new(dir.path(), false, false);

        let err = rejection(&handler, Direction::Read, "pxelinux.cfg").await;
        assert_eq!(err.code, ErrorCode::AccessViolation);
    }

    #[tokio::test]
    async fn test_write_disabled() {
        let dir = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(dir.path(), false, false);

        let err = rejection(&handler, Direction::Write, "upload").await;
        assert_eq!(err.code, ErrorCode::AccessViolation);
        assert!(!dir.path().join("upload").exists());
    }

    #[tokio::test]
    async fn test_write_new_file() {
        let dir = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(dir.path(), true, false);

        let mut transfer = handler.on_request(&request(Direction::Write, "upload")).await.unwrap();
        transfer.put_data(1, 0, &[1u8; 512]).await.unwrap();
        transfer.put_data(2, 512, &[2u8; 100]).await.unwrap();
        transfer.close(CloseReason::Completed);

        let stored = fs::read(dir.path().join("upload")).unwrap();
        assert_eq!(stored.len(), 612);
        assert!(stored[..512].iter().all(|&b| b == 1));
        assert!(stored[512..].iter().all(|&b| b == 2));
    }

    #[tokio::test]
    async fn test_write_existing_file_needs_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, b"original contents").unwrap();

        let strict = DirectoryHandler::new(dir.path(), true, false);
        let err = rejection(&strict, Direction::Write, "config.txt").await;
        assert_eq!(err.code, ErrorCode::FileExists);
        assert_eq!(fs::read(&path).unwrap(), b"original contents");

        let lenient = DirectoryHandler::new(dir.path(), true, true);
        let mut transfer = lenient.on_request(&request(Direction::Write, "config.txt")).await.unwrap();
        transfer.put_data(1, 0, b"new").await.unwrap();
        transfer.close(CloseReason::Completed);
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(dir.path(), true, false);

        let mut transfer = handler.on_request(&request(Direction::Write, "partial")).await.unwrap();
        transfer.put_data(1, 0, &[0u8; 512]).await.unwrap();
        transfer.close(CloseReason::PeerError(ErrorCode::DiskFull));

        assert!(!dir.path().join("partial").exists());
    }

    #[tokio::test]
    async fn test_write_into_missing_directory() {
        let dir = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(dir.path(), true, false);

        let err = rejection(&handler, Direction::Write, "no/such/dir/file").await;
        assert_eq!(err.code, ErrorCode::FileNotFound);
    }
}
