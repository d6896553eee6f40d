use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use hdrop_core::config::TransferConfig;
use hdrop_core::{percent, HdropError, HdropResult, ProgressSink, MAX_CHUNK_SIZE};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::header::TransferHeader;
use crate::mode::TransferMode;

#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Plaintext bytes per chunk
    pub chunk_size: usize,
    pub connect_timeout: Option<Duration>,
    /// Bound on each write to a peer that has stopped reading
    pub write_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl SenderOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            connect_timeout: config.connect_timeout(),
            write_timeout: config.read_timeout(),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

/// Outcome of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub file_name: String,
    pub bytes_sent: u64,
    pub chunks: u64,
    pub encrypted: bool,
    /// SHA-256 of the plaintext, hex
    pub sha256: String,
}

/// One outbound connection carrying exactly one file.
///
/// The stream is owned here and dropped on every exit path of
/// [`Sender::send_file`].
pub struct Sender {
    stream: TcpStream,
    peer: SocketAddr,
    options: SenderOptions,
}

impl Sender {
    pub async fn connect(peer: SocketAddr, options: SenderOptions) -> HdropResult<Self> {
        if options.chunk_size == 0 {
            return Err(HdropError::Config("chunk size must be > 0".into()));
        }
        if options.chunk_size > MAX_CHUNK_SIZE {
            return Err(HdropError::Config(format!(
                "chunk size must be <= {MAX_CHUNK_SIZE}"
            )));
        }
        let connect = TcpStream::connect(peer);
        let stream = tokio::select! {
            _ = options.cancel.cancelled() => return Err(HdropError::Cancelled),
            r = async {
                match options.connect_timeout {
                    Some(limit) => tokio::time::timeout(limit, connect).await.ok(),
                    None => Some(connect.await),
                }
            } => r,
        };
        let stream = match stream {
            Some(r) => r.map_err(|e| HdropError::network(format!("connecting to {peer}"), e))?,
            None => {
                return Err(HdropError::Timeout(format!(
                    "connecting to {peer} took longer than {:?}",
                    options.connect_timeout.unwrap_or_default()
                )))
            }
        };
        debug!(%peer, "connected");
        Ok(Self {
            stream,
            peer,
            options,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Stream `path` to the peer, then close the connection.
    pub async fn send_file(
        mut self,
        path: &Path,
        mode: &TransferMode,
        mut progress: Option<&mut dyn ProgressSink>,
    ) -> HdropResult<SendReport> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HdropError::Config(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let mut file = File::open(path).await?;
        let file_size = file.metadata().await?.len();

        let header = TransferHeader {
            file_name: file_name.clone(),
            file_size,
            encrypted: mode.is_encrypted(),
        };
        self.write(&header.encode()?).await?;

        info!(
            peer = %self.peer,
            file = %file_name,
            bytes = file_size,
            encrypted = header.encrypted,
            "sending"
        );

        let mut buf = vec![0u8; self.options.chunk_size];
        let mut hasher = Sha256::new();
        let mut sent = 0u64;
        let mut chunks = 0u64;

        if file_size == 0 {
            if let Some(p) = progress.as_deref_mut() {
                p.report(100);
            }
        }

        while sent < file_size {
            let want = (file_size - sent).min(buf.len() as u64) as usize;
            let n = fill(&mut file, &mut buf[..want]).await?;
            if n == 0 {
                return Err(HdropError::Protocol(format!(
                    "{} shrank to {sent} bytes during transfer (header said {file_size})",
                    path.display()
                )));
            }
            let chunk = &buf[..n];
            hasher.update(chunk);

            match mode {
                TransferMode::Plain => self.write(chunk).await?,
                TransferMode::Encrypted(cipher) => {
                    let frame = cipher.encrypt_chunk(chunk)?;
                    self.write(&frame.to_bytes()?).await?;
                }
            }

            sent += n as u64;
            chunks += 1;
            if let Some(p) = progress.as_deref_mut() {
                p.report(percent(sent, file_size));
            }
        }

        self.stream
            .shutdown()
            .await
            .map_err(|e| HdropError::network("closing connection", e))?;

        info!(peer = %self.peer, file = %file_name, bytes = sent, chunks, "send complete");
        Ok(SendReport {
            file_name,
            bytes_sent: sent,
            chunks,
            encrypted: mode.is_encrypted(),
            sha256: format!("{:x}", hasher.finalize()),
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> HdropResult<()> {
        let limit = self.options.write_timeout;
        let write = self.stream.write_all(bytes);
        let result = tokio::select! {
            _ = self.options.cancel.cancelled() => return Err(HdropError::Cancelled),
            r = async {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, write).await.ok(),
                    None => Some(write.await),
                }
            } => r,
        };
        match result {
            Some(r) => r.map_err(|e| HdropError::network(format!("writing to {}", self.peer), e)),
            None => Err(HdropError::Timeout(format!(
                "peer {} stopped reading for {:?}",
                self.peer,
                limit.unwrap_or_default()
            ))),
        }
    }
}

/// Read until `buf` is full or the file ends.
async fn fill(file: &mut File, buf: &mut [u8]) -> HdropResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
