use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use syndro_types::model::Device;
use tokio::sync::{RwLock, broadcast};
use tracing::info;
use uuid::Uuid;

/// A peer is evicted once no beacon or probe hit has refreshed it within
/// this window.
pub const STALE_AFTER_SECS: i64 = 60;

/// How often the eviction sweep runs.
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// The live set of reachable peers, refreshed by the beacon receiver and
/// the probe scanner and owned by a single scheduler task's registry —
/// all mutation goes through this struct's methods, which take the lock
/// only across the update itself, never across a network suspension point.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Uuid, Device>>,
    updates: broadcast::Sender<Vec<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Arc<Self> {
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self { devices: RwLock::new(HashMap::new()), updates })
    }

    /// Subscribes to device-list snapshots. Every emission is an
    /// internally-consistent copy of the live map at emit time.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Device>> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Inserts or refreshes a device (beacon receipt or probe hit) and
    /// emits an updated snapshot.
    pub async fn upsert(&self, mut device: Device) {
        device.last_seen = Utc::now();
        device.is_online = true;
        let snapshot = {
            let mut devices = self.devices.write().await;
            devices.insert(device.id, device);
            devices.values().cloned().collect::<Vec<_>>()
        };
        let _ = self.updates.send(snapshot);
    }

    /// Removes devices not refreshed within [`STALE_AFTER_SECS`]. Emits a
    /// snapshot only when something actually changed.
    pub async fn evict_stale(&self) {
        let now = Utc::now();
        let snapshot = {
            let mut devices = self.devices.write().await;
            let before = devices.len();
            devices.retain(|_, d| (now - d.last_seen).num_seconds() < STALE_AFTER_SECS);
            let removed = before - devices.len();
            if removed == 0 {
                return;
            }
            info!("discovery: evicted {removed} stale device(s)");
            devices.values().cloned().collect::<Vec<_>>()
        };
        let _ = self.updates.send(snapshot);
    }

    /// Spawns the periodic eviction sweep as an independent, cancellable
    /// task. Runs even if UDP and interface enumeration both failed —
    /// upstream consumers still see a stable (possibly empty) device list.
    pub fn spawn_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.evict_stale().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use syndro_types::model::Platform;

    fn device(id: Uuid, last_seen: chrono::DateTime<Utc>) -> Device {
        Device {
            id,
            name: "peer".into(),
            platform: Platform::Linux,
            ip: Ipv4Addr::new(192, 168, 1, 10),
            port: 8765,
            last_seen,
            is_online: true,
        }
    }

    #[tokio::test]
    async fn upsert_then_snapshot() {
        let registry = DeviceRegistry::new();
        let id = Uuid::new_v4();
        registry.upsert(device(id, Utc::now())).await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
    }

    #[tokio::test]
    async fn evict_stale_removes_old_entries() {
        let registry = DeviceRegistry::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        registry.upsert(device(stale, Utc::now() - chrono::Duration::seconds(61))).await;
        registry.upsert(device(fresh, Utc::now())).await;
        registry.evict_stale().await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, fresh);
    }
}
