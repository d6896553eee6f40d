//! Length-prefixed wire encoding for one sealed chunk.
//!
//! Field order is fixed: iv, tag, ciphertext, each preceded by its own
//! 4-byte big-endian length.

use hdrop_core::{HdropError, HdropResult};

/// Upper bound accepted for any single frame field.
pub const MAX_FIELD_LEN: usize = hdrop_core::MAX_CHUNK_SIZE;

/// The (iv, tag, ciphertext) triple produced for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunkFrame {
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedChunkFrame {
    /// Size of the packed frame on the wire.
    pub fn encoded_len(&self) -> usize {
        12 + self.iv.len() + self.tag.len() + self.ciphertext.len()
    }

    pub fn to_bytes(&self) -> HdropResult<Vec<u8>> {
        pack_frame(&self.iv, &self.tag, &self.ciphertext)
    }
}

/// Encode one frame. Fields longer than `MAX_FIELD_LEN` are refused, since
/// no receiver would accept them.
pub fn pack_frame(iv: &[u8], tag: &[u8], ciphertext: &[u8]) -> HdropResult<Vec<u8>> {
    let mut out = Vec::with_capacity(12 + iv.len() + tag.len() + ciphertext.len());
    for (field, value) in [("iv", iv), ("tag", tag), ("ciphertext", ciphertext)] {
        let len = u32::try_from(value.len())
            .ok()
            .filter(|&len| len as usize <= MAX_FIELD_LEN)
            .ok_or_else(|| {
                HdropError::Protocol(format!(
                    "{field} length {} exceeds limit {MAX_FIELD_LEN}",
                    value.len()
                ))
            })?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// Decode exactly one frame. Truncated fields, oversized lengths, and
/// trailing bytes are protocol errors.
pub fn unpack_frame(bytes: &[u8]) -> HdropResult<EncryptedChunkFrame> {
    let mut rest = bytes;
    let iv = take_field(&mut rest, "iv")?;
    let tag = take_field(&mut rest, "tag")?;
    let ciphertext = take_field(&mut rest, "ciphertext")?;
    if !rest.is_empty() {
        return Err(HdropError::Protocol(format!(
            "{} trailing bytes after frame",
            rest.len()
        )));
    }
    Ok(EncryptedChunkFrame { iv, tag, ciphertext })
}

/// Parse a frame field length, rejecting anything above `MAX_FIELD_LEN`.
pub fn field_len(prefix: [u8; 4], field: &str) -> HdropResult<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FIELD_LEN {
        return Err(HdropError::Protocol(format!(
            "{field} length {len} exceeds limit {MAX_FIELD_LEN}"
        )));
    }
    Ok(len)
}

fn take_field(rest: &mut &[u8], field: &str) -> HdropResult<Vec<u8>> {
    if rest.len() < 4 {
        return Err(HdropError::Protocol(format!("truncated {field} length")));
    }
    let (prefix, tail) = rest.split_at(4);
    let len = field_len([prefix[0], prefix[1], prefix[2], prefix[3]], field)?;
    if tail.len() < len {
        return Err(HdropError::Protocol(format!(
            "truncated {field}: need {len} bytes, have {}",
            tail.len()
        )));
    }
    let (value, tail) = tail.split_at(len);
    *rest = tail;
    Ok(value.to_vec())
}
