//! Broadcaster + listener pair that maintains the live peer table.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrop_core::config::DiscoveryConfig;
use hdrop_core::{HdropError, HdropResult};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::beacon::{DiscoveryBeacon, MAX_BEACON_LEN};
use crate::local::resolve_self_address;
use crate::peers::{DiscoveredPeer, PeerTable};

/// Lifecycle of one background activity, as seen by the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityStatus {
    Idle,
    Running,
    Stopped,
    /// Terminated by a socket error; not retried.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Name announced in beacons
    pub device_name: String,
    /// Transfer port announced in beacons
    pub service_port: u16,
    /// Where the listener binds
    pub listen_addr: SocketAddr,
    /// Where the broadcaster sends
    pub broadcast_target: SocketAddr,
    /// Route probe target for self-address detection
    pub probe_addr: SocketAddr,
    /// Skip probing and filter this address instead
    pub self_address: Option<IpAddr>,
    pub peer_ttl: Duration,
}

impl DiscoveryOptions {
    pub fn from_config(config: &DiscoveryConfig, service_port: u16) -> Self {
        Self {
            device_name: config.device_name(),
            service_port,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery_port)),
            broadcast_target: SocketAddr::new(config.broadcast_addr, config.discovery_port),
            probe_addr: config.probe_addr,
            self_address: config.self_address,
            peer_ttl: config.peer_ttl(),
        }
    }
}

/// What the listener did with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DatagramOutcome {
    Upserted,
    OwnBeacon,
    Malformed,
}

pub struct DiscoverySession {
    options: DiscoveryOptions,
    table: Arc<PeerTable>,
    cancel: CancellationToken,
    broadcaster_status: watch::Receiver<ActivityStatus>,
    listener_status: watch::Receiver<ActivityStatus>,
    listener_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoverySession {
    pub fn new(options: DiscoveryOptions) -> Self {
        let table = Arc::new(PeerTable::new(options.peer_ttl));
        let (_, broadcaster_status) = watch::channel(ActivityStatus::Idle);
        let (_, listener_status) = watch::channel(ActivityStatus::Idle);
        Self {
            options,
            table,
            cancel: CancellationToken::new(),
            broadcaster_status,
            listener_status,
            listener_addr: None,
            tasks: Vec::new(),
        }
    }

    /// Bind both sockets and spawn the broadcaster and listener.
    ///
    /// Returns once both activities are scheduled; later socket faults are
    /// reported through [`Self::broadcaster_status`] / [`Self::listener_status`].
    pub async fn start(&mut self, broadcast_interval: Duration) -> HdropResult<()> {
        if !self.tasks.is_empty() {
            return Err(HdropError::Config("discovery session already started".into()));
        }
        if broadcast_interval.is_zero() {
            return Err(HdropError::Config("broadcast interval must be > 0".into()));
        }
        if self.options.device_name.trim().is_empty() {
            return Err(HdropError::Config("device name must not be empty".into()));
        }

        let listener = UdpSocket::bind(self.options.listen_addr)
            .await
            .map_err(|e| {
                HdropError::network(format!("binding discovery port {}", self.options.listen_addr), e)
            })?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| HdropError::network("reading listener address", e))?;

        let bind_any = match self.options.broadcast_target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
        };
        let broadcaster = UdpSocket::bind(bind_any)
            .await
            .map_err(|e| HdropError::network("binding broadcast socket", e))?;
        broadcaster
            .set_broadcast(true)
            .map_err(|e| HdropError::network("enabling SO_BROADCAST", e))?;

        let self_addr = resolve_self_address(self.options.self_address, self.options.probe_addr);
        let beacon = DiscoveryBeacon::new(&self.options.device_name, self.options.service_port);

        info!(
            name = %beacon.display_name,
            service_port = beacon.service_port,
            listen = %listener_addr,
            target = %self.options.broadcast_target,
            self_addr = %self_addr,
            "discovery starting"
        );

        self.cancel = CancellationToken::new();
        let (b_tx, b_rx) = watch::channel(ActivityStatus::Running);
        let (l_tx, l_rx) = watch::channel(ActivityStatus::Running);
        self.broadcaster_status = b_rx;
        self.listener_status = l_rx;
        self.listener_addr = Some(listener_addr);

        self.tasks.push(tokio::spawn(run_broadcaster(
            broadcaster,
            beacon.encode(),
            self.options.broadcast_target,
            broadcast_interval,
            self.cancel.clone(),
            b_tx,
        )));
        self.tasks.push(tokio::spawn(run_listener(
            listener,
            self.table.clone(),
            self_addr,
            self.cancel.clone(),
            l_tx,
        )));
        Ok(())
    }

    /// Signal both activities to exit and wait for their sockets to close.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("discovery task did not shut down cleanly: {e}");
            }
        }
        debug!("discovery stopped");
    }

    /// Live peers, pruning stale entries as a side effect.
    pub fn list_peers(&self) -> Vec<DiscoveredPeer> {
        self.table.live_peers(Instant::now())
    }

    /// Poll [`Self::list_peers`] once a second until it is non-empty or
    /// `timeout` elapses.
    pub async fn wait_for_peers(&self, timeout: Duration) -> Vec<DiscoveredPeer> {
        let deadline = Instant::now() + timeout;
        loop {
            let peers = self.list_peers();
            let now = Instant::now();
            if !peers.is_empty() || now >= deadline {
                return peers;
            }
            let pause = (deadline - now).min(Duration::from_secs(1));
            tokio::select! {
                _ = self.cancel.cancelled() => return Vec::new(),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    pub fn broadcaster_status(&self) -> ActivityStatus {
        self.broadcaster_status.borrow().clone()
    }

    pub fn listener_status(&self) -> ActivityStatus {
        self.listener_status.borrow().clone()
    }

    /// Bound listener address, once started.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener_addr
    }

    pub fn table(&self) -> &PeerTable {
        &self.table
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_broadcaster(
    socket: UdpSocket,
    payload: Vec<u8>,
    target: SocketAddr,
    period: Duration,
    cancel: CancellationToken,
    status: watch::Sender<ActivityStatus>,
) {
    let mut ticker = tokio::time::interval(period);
    let result: std::io::Result<()> = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&payload, target).await {
                    break Err(e);
                }
                debug!(%target, "beacon sent");
            }
        }
    };
    finish("broadcaster", result, &status);
}

async fn run_listener(
    socket: UdpSocket,
    table: Arc<PeerTable>,
    self_addr: IpAddr,
    cancel: CancellationToken,
    status: watch::Sender<ActivityStatus>,
) {
    let mut buf = vec![0u8; MAX_BEACON_LEN];
    let result: std::io::Result<()> = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, src)) => {
                    handle_datagram(&table, self_addr, src, &buf[..n], Instant::now());
                }
                Err(e) => break Err(e),
            }
        }
    };
    finish("listener", result, &status);
}

pub(crate) fn handle_datagram(
    table: &PeerTable,
    self_addr: IpAddr,
    src: SocketAddr,
    payload: &[u8],
    now: Instant,
) -> DatagramOutcome {
    if src.ip() == self_addr {
        return DatagramOutcome::OwnBeacon;
    }
    match DiscoveryBeacon::decode(payload) {
        Ok(beacon) => {
            debug!(peer = %src.ip(), name = %beacon.display_name, "beacon received");
            table.upsert(src.ip(), &beacon.display_name, beacon.service_port, now);
            DatagramOutcome::Upserted
        }
        Err(e) => {
            debug!(peer = %src, "discarding datagram: {e}");
            DatagramOutcome::Malformed
        }
    }
}

fn finish(activity: &str, result: std::io::Result<()>, status: &watch::Sender<ActivityStatus>) {
    match result {
        Ok(()) => {
            debug!(activity, "discovery activity stopped");
            status.send_replace(ActivityStatus::Stopped);
        }
        Err(e) => {
            error!(activity, "discovery activity failed: {e}");
            status.send_replace(ActivityStatus::Failed(e.to_string()));
        }
    }
}
