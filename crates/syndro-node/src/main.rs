//! Wires FileStore, Crypto, TrustStore, Checkpoints, Discovery, and the
//! TransferEngine into one running peer (spec §2's dependency order).

mod collaborators;
mod config;

use collaborators::FileBackedStore;
use config::NodeConfig;
use std::sync::Arc;
use syndro_discovery::Discovery;
use syndro_transfer::history::NullHistory;
use syndro_transfer::parallel::ParallelConfig;
use syndro_transfer::state::{EngineConfig, EngineState};
use syndro_trust::TrustStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "syndro=info".into()),
        )
        .init();

    let config = NodeConfig::from_env()?;

    let app_docs = config.checkpoint_dir.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| config.checkpoint_dir.clone());
    let secrets_path = app_docs.join("secrets.json");
    let prefs_path = app_docs.join("prefs.json");
    let secrets: Arc<dyn syndro_trust::SecretStore> = Arc::new(FileBackedStore::load(&secrets_path).await);
    let prefs: Arc<dyn syndro_trust::Preferences> = Arc::new(FileBackedStore::load(&prefs_path).await);

    if config.auto_accept_trusted {
        prefs.set_bool("auto_accept_trusted", true).await;
    }

    let self_id = collaborators::load_or_create_device_id(prefs.as_ref()).await;
    info!("syndro node id: {self_id}");

    let download_root = match &config.download_root_override {
        Some(path) => {
            tokio::fs::create_dir_all(path).await?;
            path.clone()
        }
        None => syndro_store::resolve_download_root().await?,
    };
    info!("download root: {}", download_root.display());

    let trust = Arc::new(TrustStore::load(secrets, prefs.clone()).await?);
    let checkpoints = Arc::new(syndro_checkpoint::CheckpointStore::new(&config.checkpoint_dir).await?);

    let ram_mb = config.ram_class_mb_override.unwrap_or(collaborators::detect_ram_mb().await);
    let parallel = ParallelConfig::for_ram_mb(ram_mb);
    info!("parallel transfer class: {} connections, {}B chunks (detected {ram_mb} MB RAM)", parallel.connections, parallel.chunk_size);

    let (self_private_key, self_public_key) = syndro_crypto::new_key_pair();

    let engine_config = EngineConfig {
        self_id,
        self_name: config.device_name.clone(),
        download_root,
        parallel,
        max_file_size: EngineConfig::MAX_FILE_SIZE_DEFAULT,
        sequential_buffer_cap: EngineConfig::SEQUENTIAL_BUFFER_CAP_DEFAULT,
        self_private_key,
        self_public_key,
    };

    let state = EngineState::new(engine_config, trust.clone(), checkpoints, Arc::new(NullHistory));
    let mut sweep_handles = state.clone().spawn_sweeps();
    sweep_handles.push(trust.spawn_prune_sweep());

    let discovery = Discovery::spawn(self_id, config.device_name.clone(), config.http_port);

    let server_result = syndro_transfer::serve(state, &config.host, config.http_port).await;

    for handle in sweep_handles {
        handle.abort();
    }
    discovery.shutdown();

    server_result
}
