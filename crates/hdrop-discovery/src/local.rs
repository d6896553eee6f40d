use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Local address the OS would use to reach `probe`.
///
/// Connecting a UDP socket only selects a route; no datagram is sent.
pub fn outbound_local_ip(probe: SocketAddr) -> std::io::Result<IpAddr> {
    let bind_addr: SocketAddr = match probe {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(probe)?;
    Ok(socket.local_addr()?.ip())
}

/// Resolve this host's address for self-filtering, falling back to loopback
/// when no route exists (e.g. an offline machine).
pub fn resolve_self_address(override_addr: Option<IpAddr>, probe: SocketAddr) -> IpAddr {
    if let Some(addr) = override_addr {
        return addr;
    }
    match outbound_local_ip(probe) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(%probe, "outbound address probe failed: {e} (using loopback)");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_toward_loopback_yields_loopback() {
        let ip = outbound_local_ip(SocketAddr::from(([127, 0, 0, 1], 9))).unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn override_wins() {
        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(
            resolve_self_address(Some(addr), SocketAddr::from(([127, 0, 0, 1], 9))),
            addr
        );
    }
}
