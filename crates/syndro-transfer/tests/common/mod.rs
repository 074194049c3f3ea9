//! Shared harness for `syndro-transfer`'s end-to-end tests: binds the real
//! axum router on an OS-assigned port and drives it with a plain `reqwest`
//! client, the way a sending peer actually would.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use syndro_checkpoint::CheckpointStore;
use syndro_transfer::history::NullHistory;
use syndro_transfer::state::{EngineConfig, EngineState};
use syndro_trust::{Preferences, SecretStore, TrustStore};
use uuid::Uuid;

#[derive(Default)]
pub struct MemSecretStore {
    map: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SecretStore for MemSecretStore {
    async fn read(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }
    async fn write(&self, key: &str, value: String) {
        self.map.lock().unwrap().insert(key.to_string(), value);
    }
    async fn delete(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }
}

#[derive(Default)]
pub struct MemPreferences {
    bools: Mutex<HashMap<String, bool>>,
    strings: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl Preferences for MemPreferences {
    async fn get_bool(&self, key: &str) -> Option<bool> {
        self.bools.lock().unwrap().get(key).copied()
    }
    async fn set_bool(&self, key: &str, value: bool) {
        self.bools.lock().unwrap().insert(key.to_string(), value);
    }
    async fn get_string(&self, key: &str) -> Option<String> {
        self.strings.lock().unwrap().get(key).cloned()
    }
    async fn set_string(&self, key: &str, value: String) {
        self.strings.lock().unwrap().insert(key.to_string(), value);
    }
}

/// A running `syndro-transfer` server plus everything a test needs to act as
/// its peer: the base URL, the shared state (to drive approvals directly,
/// the way a host app's UI would), and the server's own identity/keys.
pub struct TestNode {
    pub base_url: String,
    pub state: Arc<EngineState>,
    pub download_root: PathBuf,
    _download_root_guard: tempfile::TempDir,
    _checkpoint_guard: tempfile::TempDir,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub struct TestNodeOpts {
    pub auto_accept_trusted: bool,
    pub parallel: syndro_transfer::parallel::ParallelConfig,
    pub max_file_size: u64,
}

impl Default for TestNodeOpts {
    fn default() -> Self {
        Self {
            auto_accept_trusted: false,
            parallel: syndro_transfer::parallel::ParallelConfig::HIGH,
            max_file_size: EngineConfig::MAX_FILE_SIZE_DEFAULT,
        }
    }
}

/// Starts a fresh node bound to `127.0.0.1:0`, returning once `/syndro.json`
/// is reachable.
pub async fn spawn_node(opts: TestNodeOpts) -> TestNode {
    let download_root_guard = tempfile::tempdir().unwrap();
    let checkpoint_guard = tempfile::tempdir().unwrap();

    let prefs = Arc::new(MemPreferences::default());
    prefs.set_bool("auto_accept_trusted", opts.auto_accept_trusted).await;
    let trust = Arc::new(
        TrustStore::load(Arc::new(MemSecretStore::default()), prefs)
            .await
            .unwrap(),
    );
    let checkpoints = Arc::new(CheckpointStore::new(checkpoint_guard.path()).await.unwrap());
    let (self_private_key, self_public_key) = syndro_crypto::new_key_pair();

    let config = EngineConfig {
        self_id: Uuid::new_v4(),
        self_name: "test-node".into(),
        download_root: download_root_guard.path().to_path_buf(),
        parallel: opts.parallel,
        max_file_size: opts.max_file_size,
        sequential_buffer_cap: EngineConfig::SEQUENTIAL_BUFFER_CAP_DEFAULT,
        self_private_key,
        self_public_key,
    };
    let state = EngineState::new(config, trust, checkpoints, Arc::new(NullHistory));

    let (listener, port) = syndro_transfer::bind("127.0.0.1", 0).await.unwrap();
    state.set_http_port(port);
    let app = syndro_transfer::server::router(state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.ok();
    });

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestNode {
        base_url,
        state,
        download_root: download_root_guard.path().to_path_buf(),
        _download_root_guard: download_root_guard,
        _checkpoint_guard: checkpoint_guard,
        server,
    }
}

async fn wait_until_ready(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base_url}/syndro.json")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server at {base_url} never became ready");
}
