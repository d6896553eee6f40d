use hdrop_core::HdropResult;
use hdrop_crypto::ChunkCipher;

/// How chunk bodies travel, chosen once per transfer.
#[derive(Debug, Clone)]
pub enum TransferMode {
    /// Raw bytes, no framing; the header's size bounds the stream.
    Plain,
    /// One AES-256-GCM frame per chunk.
    Encrypted(ChunkCipher),
}

impl TransferMode {
    /// `None` selects plain mode; a key of the wrong length is an error.
    pub fn from_key(key: Option<&[u8]>) -> HdropResult<Self> {
        match key {
            Some(key) => Ok(TransferMode::Encrypted(ChunkCipher::new(key)?)),
            None => Ok(TransferMode::Plain),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, TransferMode::Encrypted(_))
    }
}
