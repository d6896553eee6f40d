//! Presence beacon wire format (v1)
//!
//! ```text
//! [4 bytes: magic "HDRP"][1 byte: version = 1][2 bytes: service port, BE]
//! [1 byte: name length N][N bytes: UTF-8 display name]
//! ```
//!
//! Decoding is strict: any deviation from the schema is rejected.

use hdrop_core::{HdropError, HdropResult};

pub const BEACON_MAGIC: &[u8; 4] = b"HDRP";
pub const BEACON_VERSION: u8 = 1;

/// Longest display name a beacon can carry, in bytes.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Receive buffer size; every valid beacon fits.
pub const MAX_BEACON_LEN: usize = 1024;

const HEADER_LEN: usize = 4 + 1 + 2 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBeacon {
    pub display_name: String,
    pub service_port: u16,
}

impl DiscoveryBeacon {
    /// Names longer than `MAX_NAME_LEN` bytes are cut at a char boundary.
    pub fn new(display_name: &str, service_port: u16) -> Self {
        let mut end = display_name.len().min(MAX_NAME_LEN);
        while !display_name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            display_name: display_name[..end].to_string(),
            service_port,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let name = self.display_name.as_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + name.len());
        out.extend_from_slice(BEACON_MAGIC);
        out.push(BEACON_VERSION);
        out.extend_from_slice(&self.service_port.to_be_bytes());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out
    }

    pub fn decode(bytes: &[u8]) -> HdropResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(malformed(format!("{} bytes is shorter than header", bytes.len())));
        }
        if &bytes[..4] != BEACON_MAGIC {
            return Err(malformed("bad magic"));
        }
        if bytes[4] != BEACON_VERSION {
            return Err(malformed(format!("unsupported version {}", bytes[4])));
        }
        let service_port = u16::from_be_bytes([bytes[5], bytes[6]]);
        let name_len = bytes[7] as usize;
        let name = &bytes[HEADER_LEN..];
        if name.len() != name_len {
            return Err(malformed(format!(
                "name length {name_len} but {} bytes follow",
                name.len()
            )));
        }
        if name_len == 0 {
            return Err(malformed("empty display name"));
        }
        let display_name = std::str::from_utf8(name)
            .map_err(|_| malformed("display name is not UTF-8"))?
            .to_string();
        Ok(Self {
            display_name,
            service_port,
        })
    }
}

fn malformed(reason: impl Into<String>) -> HdropError {
    HdropError::Serialization(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrop_core::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_layout() {
        let bytes = DiscoveryBeacon::new("pi", 65432).encode();
        assert_eq!(bytes, b"HDRP\x01\xff\x98\x02pi");
    }

    #[test]
    fn test_long_name_truncated_on_char_boundary() {
        let name = "é".repeat(200); // 400 bytes
        let beacon = DiscoveryBeacon::new(&name, 1);
        assert!(beacon.display_name.len() <= MAX_NAME_LEN);
        assert_eq!(beacon.display_name.chars().count(), 127);
        assert_eq!(DiscoveryBeacon::decode(&beacon.encode()).unwrap(), beacon);
    }

    #[test]
    fn test_rejects_malformed() {
        let good = DiscoveryBeacon::new("laptop", 65432).encode();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        let mut bad_version = good.clone();
        bad_version[4] = 2;
        let mut trailing = good.clone();
        trailing.push(0);
        let mut bad_utf8 = good[..HEADER_LEN].to_vec();
        bad_utf8[7] = 2;
        bad_utf8.extend_from_slice(&[0xC3, 0x28]);
        let empty_name = DiscoveryBeacon::new("", 1).encode();
        // a pickled dict from an older peer must be refused, not evaluated
        let pickled = b"\x80\x04\x95\x1f\x00\x00\x00\x00\x00\x00\x00}\x94".to_vec();

        for bytes in [
            bad_magic,
            bad_version,
            trailing,
            bad_utf8,
            empty_name,
            pickled,
            good[..5].to_vec(),
            Vec::new(),
        ] {
            let err = DiscoveryBeacon::decode(&bytes).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Serialization, "{bytes:?}");
        }
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..=64)) {
            let _ = DiscoveryBeacon::decode(&bytes);
        }

        #[test]
        fn decode_inverts_encode(name in "[a-zA-Z0-9 _.-]{1,64}", port in any::<u16>()) {
            let beacon = DiscoveryBeacon::new(&name, port);
            prop_assert_eq!(DiscoveryBeacon::decode(&beacon.encode()).unwrap(), beacon);
        }
    }
}
