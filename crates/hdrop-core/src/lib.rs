pub mod collab;
pub mod config;
pub mod error;

pub use collab::{percent, KeyProvider, ProgressSink};
pub use config::HdropConfig;
pub use error::{ErrorKind, HdropError, HdropResult};

/// TCP port a receiver listens on for transfers
pub const DEFAULT_SERVICE_PORT: u16 = 65432;

/// UDP port presence beacons are broadcast to
pub const DEFAULT_DISCOVERY_PORT: u16 = 65433;

/// Plaintext bytes per chunk on the wire
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Largest chunk a receiver accepts; also caps every encrypted frame field
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
