//! Persistent sender-id -> trust-token map backed by an injected secret
//! store, with 90-day pruning and constant-time token comparison.

mod error;
mod store;

pub use error::TrustError;
pub use store::{Preferences, SecretStore};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use syndro_types::model::TrustedDevice;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Key under which the trusted-device array is persisted in the secret
/// store (spec §6).
pub const TRUSTED_DEVICES_KEY: &str = "syndro_trusted_devices";

fn nickname_key(id: Uuid) -> String {
    format!("device_nickname_{id}")
}

/// Daily sweep interval for pruning entries older than
/// [`TrustedDevice::MAX_AGE_DAYS`].
const PRUNE_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TrustStore {
    secrets: Arc<dyn SecretStore>,
    prefs: Arc<dyn Preferences>,
    cache: RwLock<HashMap<Uuid, TrustedDevice>>,
}

impl TrustStore {
    /// Loads the persisted trust map from the secret store.
    pub async fn load(secrets: Arc<dyn SecretStore>, prefs: Arc<dyn Preferences>) -> Result<Self, TrustError> {
        let cache = match secrets.read(TRUSTED_DEVICES_KEY).await {
            Some(raw) => {
                let devices: Vec<TrustedDevice> = serde_json::from_str(&raw)?;
                devices.into_iter().map(|d| (d.sender_id, d)).collect()
            }
            None => HashMap::new(),
        };
        Ok(Self { secrets, prefs, cache: RwLock::new(cache) })
    }

    async fn persist(&self, cache: &HashMap<Uuid, TrustedDevice>) -> Result<(), TrustError> {
        let devices: Vec<&TrustedDevice> = cache.values().collect();
        let raw = serde_json::to_string(&devices)?;
        self.secrets.write(TRUSTED_DEVICES_KEY, raw).await;
        Ok(())
    }

    /// Returns true if `sender_id` is trusted and `token` matches the
    /// persisted token, compared in constant time.
    pub async fn is_trusted(&self, sender_id: Uuid, token: &str) -> bool {
        let cache = self.cache.read().await;
        match cache.get(&sender_id) {
            Some(device) => constant_time_eq(device.token.as_bytes(), token.as_bytes()),
            None => false,
        }
    }

    pub async fn get(&self, sender_id: Uuid) -> Option<TrustedDevice> {
        self.cache.read().await.get(&sender_id).cloned()
    }

    /// Persists a new trusted device, replacing any prior entry for the
    /// same sender id.
    pub async fn trust(&self, device: TrustedDevice) -> Result<(), TrustError> {
        let mut cache = self.cache.write().await;
        cache.insert(device.sender_id, device);
        self.persist(&cache).await
    }

    pub async fn untrust(&self, sender_id: Uuid) -> Result<(), TrustError> {
        let mut cache = self.cache.write().await;
        if cache.remove(&sender_id).is_some() {
            self.persist(&cache).await?;
        }
        Ok(())
    }

    /// Removes entries older than [`TrustedDevice::MAX_AGE_DAYS`]. Returns
    /// the number of entries pruned.
    pub async fn prune_stale(&self) -> Result<usize, TrustError> {
        let now = Utc::now();
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, device| !device.is_stale(now));
        let pruned = before - cache.len();
        if pruned > 0 {
            self.persist(&cache).await?;
        }
        Ok(pruned)
    }

    pub async fn set_nickname(&self, device_id: Uuid, name: String) {
        self.prefs.set_string(&nickname_key(device_id), name).await;
    }

    pub async fn get_nickname(&self, device_id: Uuid) -> Option<String> {
        self.prefs.get_string(&nickname_key(device_id)).await
    }

    pub async fn auto_accept_trusted(&self) -> bool {
        self.prefs.get_bool("auto_accept_trusted").await.unwrap_or(false)
    }

    /// Spawns the daily pruning sweep as an independent task, cancellable
    /// by dropping the returned handle.
    pub fn spawn_prune_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match self.prune_stale().await {
                    Ok(0) => {}
                    Ok(n) => info!("pruned {n} stale trusted device(s)"),
                    Err(e) => warn!("trust store prune sweep failed: {e}"),
                }
            }
        })
    }
}

/// Length-independent constant-time byte comparison, via `subtle`'s
/// `ConstantTimeEq` (mirroring `oxcrypt-core`'s `file_ctrmac.rs` use of
/// `.ct_eq()` for the same concern).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
