//! Per-chunk AES-256-GCM encryption/decryption
//!
//! The tag is carried detached from the ciphertext so the wire frame can
//! length-prefix each field on its own. No AAD is bound; chunk order is
//! enforced by the ordered byte stream, not by the cipher.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use hdrop_core::{HdropError, HdropResult};
use rand::RngCore;

use crate::frame::EncryptedChunkFrame;
use crate::keys::ChunkKey;
use crate::{IV_SIZE, TAG_SIZE};

/// AES-256-GCM sealed per chunk under one key.
#[derive(Clone)]
pub struct ChunkCipher {
    aead: Aes256Gcm,
}

impl ChunkCipher {
    /// Fails with `InvalidKeyLength` unless `key` is exactly 32 bytes.
    pub fn new(key: &[u8]) -> HdropResult<Self> {
        let key = ChunkKey::from_slice(key)?;
        Ok(Self::from_key(&key))
    }

    pub fn from_key(key: &ChunkKey) -> Self {
        Self {
            aead: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    /// Seal `plaintext` under a fresh random IV.
    ///
    /// The returned ciphertext has the same length as `plaintext`.
    pub fn encrypt_chunk(&self, plaintext: &[u8]) -> HdropResult<EncryptedChunkFrame> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut ciphertext = plaintext.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut ciphertext)
            .map_err(|_| HdropError::Protocol("chunk too large for AES-GCM".into()))?;

        Ok(EncryptedChunkFrame {
            iv: iv.to_vec(),
            tag: tag.to_vec(),
            ciphertext,
        })
    }

    /// Open a sealed chunk. Nothing is returned unless the tag verifies.
    pub fn decrypt_chunk(&self, iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> HdropResult<Vec<u8>> {
        if iv.len() != IV_SIZE {
            return Err(HdropError::Protocol(format!(
                "IV must be {IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(HdropError::Protocol(format!(
                "tag must be {TAG_SIZE} bytes, got {}",
                tag.len()
            )));
        }

        let mut buffer = ciphertext.to_vec();
        self.aead
            .decrypt_in_place_detached(
                Nonce::from_slice(iv),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| HdropError::AuthenticationFailure)?;
        Ok(buffer)
    }

    pub fn decrypt_frame(&self, frame: &EncryptedChunkFrame) -> HdropResult<Vec<u8>> {
        self.decrypt_chunk(&frame.iv, &frame.ciphertext, &frame.tag)
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("algorithm", &"AES-256-GCM")
            .finish()
    }
}
