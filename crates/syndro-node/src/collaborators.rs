//! Stand-in implementations of the external collaborators named in spec §6
//! (`SecretStore`, `Preferences`) for running a node outside a host app that
//! would otherwise supply a platform keychain and settings store. A real
//! embedding (desktop shell, mobile app) replaces these with its own.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use syndro_trust::{Preferences, SecretStore};
use tracing::warn;

/// Plain-JSON on-disk key/value store. Not a wrapped secure keystore, but
/// it implements the same `read`/`write`/`delete` contract the core
/// requires, matching the "interfaces named, implementations external"
/// boundary from spec §1.
pub struct FileBackedStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileBackedStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Self { path, cache: Mutex::new(cache) }
    }

    async fn persist(&self, snapshot: HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(e) = tokio::fs::write(&self.path, raw).await {
                    warn!("failed to persist store {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("failed to serialize store {}: {e}", self.path.display()),
        }
    }
}

#[async_trait]
impl SecretStore for FileBackedStore {
    async fn read(&self, key: &str) -> Option<String> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    async fn write(&self, key: &str, value: String) {
        let snapshot = {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(key.to_string(), value);
            cache.clone()
        };
        self.persist(snapshot).await;
    }

    async fn delete(&self, key: &str) {
        let snapshot = {
            let mut cache = self.cache.lock().unwrap();
            cache.remove(key);
            cache.clone()
        };
        self.persist(snapshot).await;
    }
}

#[async_trait]
impl Preferences for FileBackedStore {
    async fn get_bool(&self, key: &str) -> Option<bool> {
        self.cache.lock().unwrap().get(key).map(|v| v == "true")
    }

    async fn set_bool(&self, key: &str, value: bool) {
        SecretStore::write(self, key, value.to_string()).await;
    }

    async fn get_string(&self, key: &str) -> Option<String> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    async fn set_string(&self, key: &str, value: String) {
        SecretStore::write(self, key, value).await;
    }
}

/// Key under which the device's own stable UUID is persisted (spec §6).
pub const DEVICE_ID_KEY: &str = "syndro_device_id";

/// Loads the persisted device id, generating and persisting a fresh UUIDv4
/// on first run.
pub async fn load_or_create_device_id(prefs: &dyn Preferences) -> uuid::Uuid {
    if let Some(raw) = prefs.get_string(DEVICE_ID_KEY).await {
        if let Ok(id) = raw.parse() {
            return id;
        }
    }
    let id = uuid::Uuid::new_v4();
    prefs.set_string(DEVICE_ID_KEY, id.to_string()).await;
    id
}

/// Detects total system RAM in megabytes by reading `/proc/meminfo` on
/// Linux; any other platform (or a parse failure) falls back to the
/// `>8 GB` class, matching the "platform detection at the edges" redesign
/// note in spec §9 — the core never needs to know how the number was
/// obtained, only the resulting [`syndro_transfer::ParallelConfig`].
pub async fn detect_ram_mb() -> u64 {
    const FALLBACK_MB: u64 = 16 * 1024;
    match read_meminfo_total_kb(Path::new("/proc/meminfo")).await {
        Some(kb) => kb / 1024,
        None => FALLBACK_MB,
    }
}

async fn read_meminfo_total_kb(path: &Path) -> Option<u64> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secret_store_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = FileBackedStore::load(&path).await;
            SecretStore::write(&store, "k", "v".to_string()).await;
        }
        let reloaded = FileBackedStore::load(&path).await;
        assert_eq!(SecretStore::read(&reloaded, "k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn device_id_is_generated_once_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackedStore::load(dir.path().join("prefs.json")).await;
        let first = load_or_create_device_id(&store).await;
        let second = load_or_create_device_id(&store).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn bool_prefs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackedStore::load(dir.path().join("prefs.json")).await;
        store.set_bool("auto_accept_trusted", true).await;
        assert_eq!(store.get_bool("auto_accept_trusted").await, Some(true));
    }
}
