use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hdrop_core::config::TransferConfig;
use hdrop_core::{percent, HdropError, HdropResult, ProgressSink};
use hdrop_crypto::ChunkCipher;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::header::{sanitize_file_name, TransferHeader};
use crate::mode::TransferMode;
use crate::wire::WireReader;

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub bind_addr: SocketAddr,
    pub save_dir: PathBuf,
    /// Read buffer for plain bodies
    pub chunk_size: usize,
    /// `None` waits for a sender indefinitely
    pub accept_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    /// Keep a failed transfer's bytes as `<name>.partial`
    pub keep_partial: bool,
}

impl ReceiverOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.service_port)),
            save_dir: config.save_dir.clone(),
            chunk_size: config.chunk_size,
            accept_timeout: None,
            read_timeout: config.read_timeout(),
            keep_partial: config.keep_partial,
        }
    }
}

/// A file written to disk by a successful receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub peer: SocketAddr,
    pub bytes: u64,
    pub chunks: u64,
    pub encrypted: bool,
    /// SHA-256 of the written plaintext, hex
    pub sha256: String,
}

/// Listening socket with a backlog of one.
pub struct Receiver {
    listener: TcpListener,
    options: ReceiverOptions,
    cancel: CancellationToken,
}

impl Receiver {
    /// Bind and listen. Must be called from within a tokio runtime.
    pub fn bind(options: ReceiverOptions) -> HdropResult<Self> {
        let addr = options.bind_addr;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| HdropError::network("creating listen socket", e))?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| HdropError::network("setting SO_REUSEADDR", e))?;
        socket
            .bind(addr)
            .map_err(|e| HdropError::network(format!("binding {addr}"), e))?;
        let listener = socket
            .listen(1)
            .map_err(|e| HdropError::network(format!("listening on {addr}"), e))?;
        info!(addr = %addr, save_dir = %options.save_dir.display(), "receiver listening");
        Ok(Self {
            listener,
            options,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort pending accepts and reads when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn local_addr(&self) -> HdropResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| HdropError::network("reading listener address", e))
    }

    /// Wait for one sender.
    pub async fn accept_connection(self) -> HdropResult<PendingTransfer> {
        let accept = self.listener.accept();
        let accepted = tokio::select! {
            _ = self.cancel.cancelled() => return Err(HdropError::Cancelled),
            r = async {
                match self.options.accept_timeout {
                    Some(limit) => tokio::time::timeout(limit, accept).await.ok(),
                    None => Some(accept.await),
                }
            } => r,
        };
        let (stream, peer) = match accepted {
            Some(r) => r.map_err(|e| HdropError::network("accepting connection", e))?,
            None => {
                return Err(HdropError::Timeout(format!(
                    "no sender connected within {:?}",
                    self.options.accept_timeout.unwrap_or_default()
                )))
            }
        };
        info!(%peer, "sender connected");
        Ok(PendingTransfer {
            _listener: self.listener,
            stream,
            peer,
            options: self.options,
            cancel: self.cancel,
        })
    }
}

/// An accepted connection whose body has not been read yet.
///
/// Holds the listening socket too, so both close when
/// [`PendingTransfer::receive_file`] returns.
pub struct PendingTransfer {
    _listener: TcpListener,
    stream: TcpStream,
    peer: SocketAddr,
    options: ReceiverOptions,
    cancel: CancellationToken,
}

impl PendingTransfer {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read the header and body, writing the file atomically into the save
    /// directory.
    pub async fn receive_file(
        self,
        mode: &TransferMode,
        progress: Option<&mut dyn ProgressSink>,
    ) -> HdropResult<ReceivedFile> {
        let PendingTransfer {
            _listener,
            stream,
            peer,
            options,
            cancel,
        } = self;
        let mut reader = WireReader::new(stream, options.read_timeout, cancel);

        let header = TransferHeader::read_from(&mut reader).await?;
        let name = sanitize_file_name(&header.file_name)?.to_string();
        let cipher = match (header.encrypted, mode) {
            (true, TransferMode::Encrypted(cipher)) => Some(cipher),
            (true, TransferMode::Plain) => {
                return Err(HdropError::Config(format!(
                    "{peer} sent an encrypted transfer but no key is configured"
                )))
            }
            (false, TransferMode::Encrypted(_)) => {
                warn!(%peer, "peer sent an unencrypted transfer; accepting plaintext");
                None
            }
            (false, TransferMode::Plain) => None,
        };
        info!(
            %peer,
            file = %name,
            bytes = header.file_size,
            encrypted = header.encrypted,
            "receiving"
        );

        tokio::fs::create_dir_all(&options.save_dir).await?;
        let (std_file, temp_path) = NamedTempFile::new_in(&options.save_dir)?.into_parts();
        let mut out = tokio::fs::File::from_std(std_file);

        let body = read_body(
            &mut reader,
            &mut out,
            cipher,
            header.file_size,
            options.chunk_size.max(1),
            progress,
        )
        .await;
        let flushed = out.flush().await;
        drop(out);

        let body = match body.and_then(|b| flushed.map(|()| b).map_err(HdropError::from)) {
            Ok(body) => body,
            Err(e) => {
                warn!(%peer, file = %name, "receive failed: {e}");
                discard(temp_path, &options.save_dir, &name, options.keep_partial);
                return Err(e);
            }
        };

        let path = options.save_dir.join(&name);
        temp_path.persist(&path).map_err(|e| e.error)?;
        info!(%peer, path = %path.display(), bytes = body.bytes, chunks = body.chunks, "receive complete");

        Ok(ReceivedFile {
            path,
            peer,
            bytes: body.bytes,
            chunks: body.chunks,
            encrypted: cipher.is_some(),
            sha256: body.sha256,
        })
    }
}

struct BodyStats {
    bytes: u64,
    chunks: u64,
    sha256: String,
}

async fn read_body<R, W>(
    reader: &mut WireReader<R>,
    out: &mut W,
    cipher: Option<&ChunkCipher>,
    total: u64,
    buf_size: usize,
    mut progress: Option<&mut dyn ProgressSink>,
) -> HdropResult<BodyStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut chunks = 0u64;
    let mut buf = vec![0u8; buf_size];

    if total == 0 {
        if let Some(p) = progress.as_deref_mut() {
            p.report(100);
        }
    }

    while written < total {
        let remaining = total - written;
        let n = match cipher {
            Some(cipher) => {
                let frame = reader.read_frame().await?;
                // Nothing reaches the file unless the tag verified.
                let plain = cipher.decrypt_frame(&frame)?;
                if plain.is_empty() {
                    return Err(HdropError::Protocol("empty encrypted chunk".into()));
                }
                if plain.len() as u64 > remaining {
                    return Err(HdropError::Protocol(format!(
                        "chunk of {} bytes overruns declared size ({remaining} left)",
                        plain.len()
                    )));
                }
                out.write_all(&plain).await?;
                hasher.update(&plain);
                plain.len()
            }
            None => {
                let want = remaining.min(buf.len() as u64) as usize;
                let n = reader.read_some(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(HdropError::ConnectionClosed {
                        expected: usize::try_from(total).unwrap_or(usize::MAX),
                        received: usize::try_from(written).unwrap_or(usize::MAX),
                    });
                }
                out.write_all(&buf[..n]).await?;
                hasher.update(&buf[..n]);
                n
            }
        };
        written += n as u64;
        chunks += 1;
        debug!(written, total, "chunk written");
        if let Some(p) = progress.as_deref_mut() {
            p.report(percent(written, total));
        }
    }

    Ok(BodyStats {
        bytes: written,
        chunks,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Remove a failed transfer's temp file, or keep it as `<name>.partial`.
fn discard(temp_path: TempPath, save_dir: &Path, name: &str, keep_partial: bool) {
    if !keep_partial {
        if let Err(e) = temp_path.close() {
            warn!("removing temp file: {e}");
        }
        return;
    }
    let partial = save_dir.join(format!("{name}.partial"));
    match temp_path.persist(&partial) {
        Ok(()) => warn!(path = %partial.display(), "kept partial file"),
        Err(e) => warn!(path = %partial.display(), "could not keep partial file: {}", e.error),
    }
}
