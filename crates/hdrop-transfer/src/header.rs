//! Transfer header, written once right after the connection is established.
//!
//! ```text
//! [u32 fileNameLen][fileNameLen bytes utf8][u64 fileSize][u32 encryptedFlag]
//! ```

use hdrop_core::{HdropError, HdropResult};
use tokio::io::AsyncRead;

use crate::wire::WireReader;

/// Longest file name accepted on the wire, checked before allocating.
pub const MAX_FILE_NAME_LEN: usize = 4096;

/// Longest base name we will create on disk.
pub const MAX_BASE_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub file_name: String,
    pub file_size: u64,
    pub encrypted: bool,
}

impl TransferHeader {
    pub fn encode(&self) -> HdropResult<Vec<u8>> {
        let name = self.file_name.as_bytes();
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(HdropError::Protocol(format!(
                "file name is {} bytes, limit {MAX_FILE_NAME_LEN}",
                name.len()
            )));
        }
        let mut out = Vec::with_capacity(4 + name.len() + 8 + 4);
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.file_size.to_be_bytes());
        out.extend_from_slice(&u32::from(self.encrypted).to_be_bytes());
        Ok(out)
    }

    /// Four exact-length reads: name length, name, size, flag.
    ///
    /// The name is returned as sent; run it through [`sanitize_file_name`]
    /// before touching the filesystem.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut WireReader<R>) -> HdropResult<Self> {
        let name_len = reader.read_u32().await? as usize;
        if name_len > MAX_FILE_NAME_LEN {
            return Err(HdropError::Protocol(format!(
                "file name length {name_len} exceeds limit {MAX_FILE_NAME_LEN}"
            )));
        }
        let raw_name = reader.read_exact_vec(name_len).await?;
        let file_name = String::from_utf8(raw_name)
            .map_err(|_| HdropError::Protocol("file name is not valid UTF-8".into()))?;
        let file_size = reader.read_u64().await?;
        let encrypted = match reader.read_u32().await? {
            0 => false,
            1 => true,
            other => {
                return Err(HdropError::Protocol(format!(
                    "unknown encrypted flag {other}"
                )))
            }
        };
        Ok(Self {
            file_name,
            file_size,
            encrypted,
        })
    }
}

/// Accept `name` only if it is a plain base name safe to join onto the save
/// directory.
pub fn sanitize_file_name(name: &str) -> HdropResult<&str> {
    let reject = |why: &str| Err(HdropError::Protocol(format!("rejected file name {name:?}: {why}")));

    if name.is_empty() {
        return reject("empty");
    }
    if name == "." || name == ".." {
        return reject("not a file");
    }
    if name.len() > MAX_BASE_NAME_LEN {
        return reject("too long");
    }
    if name.contains(['/', '\\', '\0']) {
        return reject("contains a path separator or NUL");
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return reject("drive-qualified");
    }
    Ok(name)
}
