use crate::beacon::parse_platform;
use crate::interfaces::local_ipv4_interfaces;
use crate::ratelimit::ScanRateLimiter;
use crate::registry::DeviceRegistry;
use chrono::Utc;
use futures_util::{StreamExt, stream};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use syndro_types::model::Device;
use syndro_types::wire::SyndroInfo;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed candidate service ports probed on every host.
pub const PROBE_PORTS: &[u16] = &[8765, 8766, 8767, 8768, 8769, 8770, 50050, 50500];

pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_millis(800);

/// Upper bound on host addresses enumerated per scan cycle, across all
/// detected subnets combined.
pub const MAX_IPS_PER_CYCLE: usize = 500;
/// Concurrent probe batch size.
pub const BATCH_SIZE: usize = 200;
/// How often a full scan cycle runs.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(15);

/// Orders the 1..254 host range for one /24 subnet with hosts within ±20
/// of `own_host` first, then the rest in ascending order, excluding the
/// caller's own host-part.
pub fn ordered_hosts(own_host: u8) -> Vec<u8> {
    let mut nearby = Vec::new();
    let mut rest = Vec::new();
    for h in 1u16..=254 {
        let h = h as u8;
        if h == own_host {
            continue;
        }
        if (h as i16 - own_host as i16).abs() <= 20 {
            nearby.push(h);
        } else {
            rest.push(h);
        }
    }
    nearby.sort_by_key(|&h| (h as i16 - own_host as i16).abs());
    nearby.into_iter().chain(rest).collect()
}

async fn probe_port(ip: Ipv4Addr, port: u16, client: &reqwest::Client, self_id: Uuid) -> Option<Device> {
    let addr = SocketAddr::new(IpAddr::V4(ip), port);
    let connected = tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
    match connected {
        Ok(Ok(_stream)) => {}
        _ => return None,
    }

    let url = format!("http://{ip}:{port}/syndro.json");
    let response = tokio::time::timeout(METADATA_FETCH_TIMEOUT, client.get(&url).send())
        .await
        .ok()?
        .ok()?;
    let info: SyndroInfo = response.json().await.ok()?;
    if info.id == self_id {
        return None;
    }
    Some(Device {
        id: info.id,
        name: info.name,
        platform: parse_platform(info.platform.as_deref().unwrap_or(&info.os)),
        ip,
        port: info.port,
        last_seen: Utc::now(),
        is_online: true,
    })
}

/// Tries every candidate port on `ip` concurrently, admitting the first
/// response that parses as a valid, non-self `SyndroInfo`.
async fn probe_host(ip: Ipv4Addr, client: reqwest::Client, self_id: Uuid) -> Option<Device> {
    let attempts = PROBE_PORTS.iter().map(|&port| {
        let client = client.clone();
        async move { probe_port(ip, port, &client, self_id).await }
    });
    futures_util::future::join_all(attempts).await.into_iter().flatten().next()
}

/// Runs one scan cycle over every detected local subnet, admitting
/// discoveries into `registry` up to `rate_limiter`'s sliding-window cap.
pub async fn scan_cycle(
    self_id: Uuid,
    client: reqwest::Client,
    registry: Arc<DeviceRegistry>,
    rate_limiter: Arc<ScanRateLimiter>,
) {
    let interfaces = local_ipv4_interfaces();
    let mut candidates = Vec::new();
    for iface in &interfaces {
        let octets = iface.octets();
        for host in ordered_hosts(octets[3]) {
            candidates.push(Ipv4Addr::new(octets[0], octets[1], octets[2], host));
            if candidates.len() >= MAX_IPS_PER_CYCLE {
                break;
            }
        }
        if candidates.len() >= MAX_IPS_PER_CYCLE {
            break;
        }
    }
    candidates.truncate(MAX_IPS_PER_CYCLE);

    let found: Vec<Device> = stream::iter(candidates)
        .map(|ip| {
            let client = client.clone();
            async move { probe_host(ip, client, self_id).await }
        })
        .buffer_unordered(BATCH_SIZE)
        .filter_map(|d| async move { d })
        .collect()
        .await;

    for device in found {
        if !rate_limiter.try_acquire() {
            warn!("discovery: scan rate limit reached, dropping {}", device.id);
            continue;
        }
        debug!("discovery: probe scan admitted {} ({})", device.name, device.ip);
        registry.upsert(device).await;
    }
}

/// Spawns the periodic probe-scan loop as an independent, cancellable task.
pub fn spawn_scan_loop(
    self_id: Uuid,
    registry: Arc<DeviceRegistry>,
    rate_limiter: Arc<ScanRateLimiter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(METADATA_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        let mut interval = tokio::time::interval(SCAN_INTERVAL);
        loop {
            interval.tick().await;
            scan_cycle(self_id, client.clone(), registry.clone(), rate_limiter.clone()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_nearby_hosts_first() {
        let hosts = ordered_hosts(100);
        assert_eq!(hosts[0], 99);
        assert_eq!(hosts[1], 101);
    }

    #[test]
    fn nearby_hosts_within_window_come_before_far_ones() {
        let hosts = ordered_hosts(50);
        let pos_51 = hosts.iter().position(|&h| h == 51).unwrap();
        let pos_200 = hosts.iter().position(|&h| h == 200).unwrap();
        assert!(pos_51 < pos_200);
    }

    #[test]
    fn excludes_own_host() {
        let hosts = ordered_hosts(10);
        assert!(!hosts.contains(&10));
        assert_eq!(hosts.len(), 253);
    }
}
