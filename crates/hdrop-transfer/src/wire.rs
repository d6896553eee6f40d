//! Exact-length reads over the transfer stream.
//!
//! Every read races the cancellation token and, when configured, a per-read
//! timeout. A stream that ends before the requested count is reached yields
//! [`HdropError::ConnectionClosed`].

use std::time::Duration;

use hdrop_core::{HdropError, HdropResult};
use hdrop_crypto::frame::field_len;
use hdrop_crypto::EncryptedChunkFrame;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

pub struct WireReader<R> {
    inner: R,
    read_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R, read_timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            read_timeout,
            cancel,
        }
    }

    /// One read of up to `buf.len()` bytes. `Ok(0)` means end of stream.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> HdropResult<usize> {
        let read = self.inner.read(buf);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(HdropError::Cancelled),
            r = with_timeout(self.read_timeout, read) => r,
        };
        match result {
            Some(r) => r.map_err(|e| HdropError::network("reading from peer", e)),
            None => Err(HdropError::Timeout(format!(
                "no data from peer within {:?}",
                self.read_timeout.unwrap_or_default()
            ))),
        }
    }

    /// Fill `buf` completely or fail.
    pub async fn read_exact_into(&mut self, buf: &mut [u8]) -> HdropResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(HdropError::ConnectionClosed {
                    expected: buf.len(),
                    received: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    pub async fn read_exact_vec(&mut self, len: usize) -> HdropResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_into(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_u32(&mut self) -> HdropResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_into(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    pub async fn read_u64(&mut self) -> HdropResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_into(&mut buf).await?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read one `[ivLen][iv][tagLen][tag][ctLen][ciphertext]` frame.
    pub async fn read_frame(&mut self) -> HdropResult<EncryptedChunkFrame> {
        let iv = self.read_field("iv").await?;
        let tag = self.read_field("tag").await?;
        let ciphertext = self.read_field("ciphertext").await?;
        Ok(EncryptedChunkFrame { iv, tag, ciphertext })
    }

    async fn read_field(&mut self, field: &str) -> HdropResult<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.read_exact_into(&mut prefix).await?;
        let len = field_len(prefix, field)?;
        self.read_exact_vec(len).await
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// `None` when the deadline passed first.
async fn with_timeout<F: std::future::Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
