//! hdrop-discovery: zero-configuration LAN presence
//!
//! Each device periodically broadcasts a small beacon (display name + the TCP
//! port its receiver listens on) and listens for everyone else's. Heard
//! beacons populate a [`PeerTable`]; entries not refreshed within the TTL are
//! dropped when the table is next queried.

pub mod beacon;
pub mod local;
pub mod peers;
pub mod session;

pub use beacon::DiscoveryBeacon;
pub use local::{outbound_local_ip, resolve_self_address};
pub use peers::{DiscoveredPeer, PeerRecord, PeerSelector, PeerTable, DEFAULT_PEER_TTL};
pub use session::{ActivityStatus, DiscoveryOptions, DiscoverySession};
