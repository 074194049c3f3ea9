//! LAN peer discovery: a UDP broadcast beacon, a concurrent TCP probe scan,
//! and a TTL-evicting device registry, wired together as independent
//! cancellable tasks.

pub mod beacon;
pub mod interfaces;
pub mod ratelimit;
pub mod registry;
pub mod scan;

pub use registry::DeviceRegistry;

use ratelimit::ScanRateLimiter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Default cap on scan-triggered discoveries per 60s window.
const DEFAULT_SCAN_RATE_LIMIT: usize = 120;

/// Handles to every independent task the discovery subsystem spawns, kept
/// only so the whole subsystem can be cancelled together on shutdown.
pub struct Discovery {
    pub registry: Arc<DeviceRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl Discovery {
    /// Starts every discovery task: beacon sender/receiver (if a UDP port
    /// could be bound), the probe scanner, and the stale-device sweeper.
    /// Never fails — any socket error is logged and the subsystem
    /// continues with whatever discovery paths remain available.
    pub fn spawn(self_id: Uuid, name: String, http_port: u16) -> Self {
        let registry = DeviceRegistry::new();
        let mut tasks = Vec::new();

        let os = std::env::consts::OS.to_string();
        match beacon::bind_beacon_socket() {
            Some((socket, udp_port)) => {
                let socket = Arc::new(socket);
                info!("discovery: UDP beacon bound on port {udp_port}");
                tasks.push(beacon::spawn_beacon_sender(
                    socket.clone(),
                    udp_port,
                    self_id,
                    name,
                    os,
                    http_port,
                ));
                tasks.push(beacon::spawn_beacon_receiver(socket, self_id, registry.clone()));
            }
            None => {
                info!("discovery: UDP beacon unavailable, continuing with TCP probe scan only");
            }
        }

        let rate_limiter = Arc::new(ScanRateLimiter::new(DEFAULT_SCAN_RATE_LIMIT));
        tasks.push(scan::spawn_scan_loop(self_id, registry.clone(), rate_limiter));
        tasks.push(registry.clone().spawn_sweep());

        Self { registry, tasks }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<syndro_types::model::Device>> {
        self.registry.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<syndro_types::model::Device> {
        self.registry.snapshot().await
    }

    /// Cancels every spawned task. Draining is immediate since none of
    /// these tasks hold resources beyond their own socket/timer.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
