//! Transfer key type and generation

use hdrop_core::{HdropError, HdropResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit transfer key. Zeroized on drop.
#[derive(Clone)]
pub struct ChunkKey {
    bytes: [u8; KEY_SIZE],
}

impl ChunkKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Fails with `InvalidKeyLength` unless `key` is exactly 32 bytes.
    pub fn from_slice(key: &[u8]) -> HdropResult<Self> {
        let bytes: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| HdropError::InvalidKeyLength(key.len()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ChunkKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit key from the OS CSPRNG.
pub fn generate_key() -> ChunkKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    ChunkKey::from_bytes(bytes)
}
