//! hdrop-crypto: per-chunk authenticated encryption for file transfers
//!
//! Every chunk is sealed independently with AES-256-GCM under a fresh random
//! 96-bit IV, so a receiver can reject a tampered chunk without buffering the
//! rest of the file.
//!
//! Encrypted chunk frame (all lengths u32 big-endian):
//! ```text
//! [ivLen][iv (12)][tagLen][tag (16)][ctLen][ciphertext (== plaintext len)]
//! ```

pub mod checksum;
pub mod cipher;
pub mod frame;
pub mod keys;

pub use checksum::{checksum, checksum_file};
pub use cipher::ChunkCipher;
pub use frame::{pack_frame, unpack_frame, EncryptedChunkFrame};
pub use keys::{generate_key, ChunkKey};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM IV size (96-bit)
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;
