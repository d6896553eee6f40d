//! Live peer table with TTL-based expiry.
//!
//! Records are refreshed by the beacon listener and expire when not heard
//! from within the TTL. There is no background reaper: stale entries are
//! pruned when the table is queried.

use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default staleness window
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(30);

/// Last known state of one remote device, keyed by address.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address: IpAddr,
    pub display_name: String,
    pub service_port: u16,
    pub last_seen_at: Instant,
}

/// A live peer as handed to selection logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPeer {
    pub address: IpAddr,
    pub name: String,
    pub service_port: u16,
}

/// Chooses the destination for a transfer from the live peer list.
pub trait PeerSelector {
    fn select(&self, peers: &[DiscoveredPeer]) -> Option<IpAddr>;
}

/// Thread-safe peer table shared by the listener and queriers.
pub struct PeerTable {
    entries: Mutex<HashMap<IpAddr, PeerRecord>>,
    ttl: Duration,
}

impl PeerTable {
    pub fn new(ttl: Duration) -> Self {
        PeerTable {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or refresh `address`. Last writer wins.
    pub fn upsert(&self, address: IpAddr, display_name: &str, service_port: u16, now: Instant) {
        let mut map = self.lock();
        map.insert(
            address,
            PeerRecord {
                address,
                display_name: display_name.to_string(),
                service_port,
                last_seen_at: now,
            },
        );
    }

    /// Drop every record older than the TTL at `now`. Returns how many went.
    pub fn prune(&self, now: Instant) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, rec| is_live(rec, now, self.ttl));
        before - map.len()
    }

    /// Live records at `now`, without mutating the table.
    pub fn snapshot(&self, now: Instant) -> Vec<DiscoveredPeer> {
        let map = self.lock();
        let mut peers: Vec<DiscoveredPeer> = map
            .values()
            .filter(|rec| is_live(rec, now, self.ttl))
            .map(|rec| DiscoveredPeer {
                address: rec.address,
                name: rec.display_name.clone(),
                service_port: rec.service_port,
            })
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then(a.address.cmp(&b.address)));
        peers
    }

    /// Prune, then snapshot, under one lock acquisition each.
    pub fn live_peers(&self, now: Instant) -> Vec<DiscoveredPeer> {
        let pruned = self.prune(now);
        if pruned > 0 {
            tracing::debug!(pruned, "expired stale peers");
        }
        self.snapshot(now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, PeerRecord>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TTL)
    }
}

fn is_live(rec: &PeerRecord, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(rec.last_seen_at) <= ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 1, last])
    }

    #[test]
    fn upsert_and_list() {
        let table = PeerTable::default();
        let now = Instant::now();
        table.upsert(ip(2), "laptop", 65432, now);
        table.upsert(ip(3), "desktop", 65432, now);

        let peers = table.live_peers(now);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name, "desktop");
        assert_eq!(peers[1].address, ip(2));
    }

    #[test]
    fn ttl_window_boundaries() {
        let table = PeerTable::default();
        let t = Instant::now();
        table.upsert(ip(2), "laptop", 65432, t);

        assert_eq!(table.live_peers(t + Duration::from_secs(29)).len(), 1);
        assert!(table.live_peers(t + Duration::from_secs(31)).is_empty());
        // pruned as a side effect
        assert!(table.is_empty());
    }

    #[test]
    fn refresh_extends_lifetime_and_renames() {
        let table = PeerTable::default();
        let t = Instant::now();
        table.upsert(ip(2), "old-name", 65432, t);
        table.upsert(ip(2), "new-name", 40000, t + Duration::from_secs(20));

        let peers = table.live_peers(t + Duration::from_secs(45));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "new-name");
        assert_eq!(peers[0].service_port, 40000);
    }

    #[test]
    fn snapshot_does_not_prune() {
        let table = PeerTable::new(Duration::from_secs(1));
        let t = Instant::now();
        table.upsert(ip(9), "gone", 1, t);
        assert!(table.snapshot(t + Duration::from_secs(5)).is_empty());
        assert_eq!(table.len(), 1);
        assert_eq!(table.prune(t + Duration::from_secs(5)), 1);
        assert!(table.is_empty());
    }
}
