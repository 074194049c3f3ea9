use crate::interfaces::{local_ipv4_interfaces, subnet_broadcast};
use crate::registry::DeviceRegistry;
use chrono::Utc;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use syndro_types::model::{Device, Platform};
use syndro_types::wire::Beacon;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// First UDP port tried for the broadcast beacon.
pub const BASE_UDP_PORT: u16 = 8771;
/// Additional ports tried if the base port is busy.
pub const UDP_PORT_FALLBACKS: u16 = 5;

pub const BEACON_INTERVAL: Duration = Duration::from_secs(5);

/// Binds a broadcast-capable UDP socket on `BASE_UDP_PORT..=BASE_UDP_PORT +
/// UDP_PORT_FALLBACKS`, first success wins. Failure here is non-fatal: the
/// node continues with TCP probe-scan discovery only.
pub fn bind_beacon_socket() -> Option<(UdpSocket, u16)> {
    for offset in 0..=UDP_PORT_FALLBACKS {
        let port = BASE_UDP_PORT + offset;
        match create_broadcast_socket(port) {
            Ok(socket) => return Some((socket, port)),
            Err(e) => {
                warn!("discovery: UDP bind on port {port} failed: {e}");
            }
        }
    }
    None
}

fn create_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Sends a beacon datagram to the global broadcast address and every
/// detected subnet's broadcast address, every [`BEACON_INTERVAL`].
pub fn spawn_beacon_sender(
    socket: Arc<UdpSocket>,
    udp_port: u16,
    self_id: Uuid,
    name: String,
    os: String,
    http_port: u16,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BEACON_INTERVAL);
        loop {
            interval.tick().await;
            let beacon = Beacon::new(self_id, name.clone(), os.clone(), http_port, Utc::now().timestamp());
            let payload = match serde_json::to_vec(&beacon) {
                Ok(p) => p,
                Err(e) => {
                    warn!("discovery: failed to encode beacon: {e}");
                    continue;
                }
            };

            let mut targets = vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), udp_port)];
            for iface in local_ipv4_interfaces() {
                targets.push(SocketAddr::new(IpAddr::V4(subnet_broadcast(iface)), udp_port));
            }

            for target in targets {
                if let Err(e) = socket.send_to(&payload, target).await {
                    debug!("discovery: beacon send to {target} failed: {e}");
                }
            }
        }
    })
}

/// Receives beacon datagrams, ignoring its own id and anything that fails
/// to parse as a `{syndro: true, ...}` payload, and upserts the sender into
/// the registry.
pub fn spawn_beacon_receiver(
    socket: Arc<UdpSocket>,
    self_id: Uuid,
    registry: Arc<DeviceRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("discovery: beacon recv error: {e}");
                    continue;
                }
            };
            let Ok(beacon) = serde_json::from_slice::<Beacon>(&buf[..len]) else {
                continue;
            };
            if !beacon.syndro || beacon.id == self_id {
                continue;
            }
            let IpAddr::V4(ip) = src.ip() else { continue };
            registry
                .upsert(Device {
                    id: beacon.id,
                    name: beacon.name,
                    platform: parse_platform(&beacon.os),
                    ip,
                    port: beacon.port,
                    last_seen: Utc::now(),
                    is_online: true,
                })
                .await;
        }
    })
}

pub fn parse_platform(os: &str) -> Platform {
    match os.to_ascii_lowercase().as_str() {
        "android" => Platform::Android,
        "windows" => Platform::Windows,
        "linux" => Platform::Linux,
        "macos" | "darwin" => Platform::Macos,
        "ios" => Platform::Ios,
        _ => Platform::Unknown,
    }
}
