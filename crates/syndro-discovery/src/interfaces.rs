use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Returns every local IPv4 interface address, excluding loopback and
/// anything outside RFC-1918 private ranges or link-local (169.254/16).
/// Enumeration failure is non-fatal — an empty list just means the probe
/// scanner has nothing to enumerate this cycle.
pub fn local_ipv4_interfaces() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => ifas
            .into_iter()
            .filter_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if is_scannable(v4) => Some(v4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("discovery: interface enumeration failed: {e}");
            Vec::new()
        }
    }
}

fn is_scannable(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() {
        return false;
    }
    let o = ip.octets();
    match o[0] {
        10 => true,
        172 => (16..=31).contains(&o[1]),
        192 => o[1] == 168,
        169 => o[1] == 254,
        _ => false,
    }
}

/// The broadcast address for a /24 subnet containing `ip` (`a.b.c.255`).
pub fn subnet_broadcast(ip: Ipv4Addr) -> Ipv4Addr {
    let o = ip.octets();
    Ipv4Addr::new(o[0], o[1], o[2], 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_broadcast_sets_last_octet() {
        assert_eq!(
            subnet_broadcast(Ipv4Addr::new(192, 168, 1, 42)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    #[test]
    fn rejects_loopback_and_public() {
        assert!(!is_scannable(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!is_scannable(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(is_scannable(Ipv4Addr::new(192, 168, 1, 5)));
        assert!(is_scannable(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(is_scannable(Ipv4Addr::new(172, 20, 0, 5)));
        assert!(is_scannable(Ipv4Addr::new(169, 254, 1, 1)));
    }
}
