use crate::history::TransferHistory;
use crate::parallel::{ChunkWriterState, ParallelConfig};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use syndro_checkpoint::CheckpointStore;
use syndro_crypto::Channel;
use syndro_trust::TrustStore;
use syndro_types::model::{EncryptionSession, PendingTransferRequest, Progress, Transfer, TransferStatus};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// How often the pending-request and session maps are swept for entries past
/// their TTL (§5/§9 "global timers" — each map is owned by a single task).
const PENDING_REQUEST_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// An event the engine emits for a host application to forward to its own
/// listeners (§6). Carries only identifiers the host already holds.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    PendingApproval { request: PendingTransferRequest },
    Accepted { request_id: String },
    Rejected { request_id: String },
    Cancelled { transfer_id: String },
    Progress { transfer: Transfer },
}

pub struct EngineConfig {
    pub self_id: Uuid,
    pub self_name: String,
    pub download_root: PathBuf,
    pub parallel: ParallelConfig,
    pub max_file_size: u64,
    pub sequential_buffer_cap: usize,
    /// This node's own X25519 identity, advertised at `/syndro.json` and
    /// used to answer `/key-exchange` requests from peers.
    pub self_private_key: [u8; 32],
    pub self_public_key: [u8; 32],
}

impl EngineConfig {
    /// Spec §4.6.6: files above this size are rejected at initiate (sender)
    /// or upload start (receiver).
    pub const MAX_FILE_SIZE_DEFAULT: u64 = 100 * 1024 * 1024 * 1024;
    /// Spec §4.6.5: bounded in-memory buffer for the sequential encrypted
    /// upload path.
    pub const SEQUENTIAL_BUFFER_CAP_DEFAULT: usize = 10 * 1024 * 1024;
}

struct SessionEntry {
    channel: Arc<Channel>,
    session: EncryptionSession,
}

fn session_key(local_id: Uuid, remote_id: Uuid) -> String {
    format!("{local_id}-{remote_id}")
}

/// Owns every map the TransferEngine mutates (§5 "shared-resource policy"):
/// active transfers, pending approval requests, per-peer encryption
/// sessions, and in-flight parallel chunk writers. Each map is behind its
/// own lock; no lock is held across a network or disk suspension point.
pub struct EngineState {
    pub config: EngineConfig,
    pub trust: Arc<TrustStore>,
    pub checkpoints: Arc<CheckpointStore>,
    pub history: Arc<dyn TransferHistory>,
    pub http: reqwest::Client,

    active_transfers: RwLock<HashMap<String, Transfer>>,
    pending_requests: RwLock<HashMap<String, PendingTransferRequest>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    parallel_writers: RwLock<HashMap<String, Arc<ChunkWriterState>>>,
    /// Count of items finished per transfer, feeding `Checkpoint.current_file_index`.
    files_done: RwLock<HashMap<String, usize>>,
    approvals: RwLock<HashMap<String, Resolution>>,
    /// The port the HTTP server actually bound to, stamped once known
    /// (the bind loop in `server.rs` may retry past the configured port).
    http_port: AtomicU16,

    events_tx: broadcast::Sender<TransferEvent>,
}

/// Outcome of a host-driven approve/reject decision on a
/// [`PendingTransferRequest`], kept so `/transfer/approval/{id}` polling can
/// observe it once it is no longer present in `pending_requests`.
#[derive(Debug, Clone)]
pub enum Resolution {
    Approved { transfer_id: String, public_key: Option<Vec<u8>> },
    Rejected,
}

impl EngineState {
    pub fn new(
        config: EngineConfig,
        trust: Arc<TrustStore>,
        checkpoints: Arc<CheckpointStore>,
        history: Arc<dyn TransferHistory>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            trust,
            checkpoints,
            history,
            http: reqwest::Client::new(),
            active_transfers: RwLock::new(HashMap::new()),
            pending_requests: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            parallel_writers: RwLock::new(HashMap::new()),
            files_done: RwLock::new(HashMap::new()),
            approvals: RwLock::new(HashMap::new()),
            http_port: AtomicU16::new(0),
            events_tx,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransferEvent> {
        self.events_tx.subscribe()
    }

    /// The port the HTTP server bound to, stamped by the bind-retry loop in
    /// `lib.rs` once known. Zero before the server has started listening.
    pub fn http_port(&self) -> u16 {
        self.http_port.load(Ordering::Relaxed)
    }

    pub fn set_http_port(&self, port: u16) {
        self.http_port.store(port, Ordering::Relaxed);
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events_tx.send(event);
    }

    // ── Pending requests ────────────────────────────────────────────────

    pub async fn register_pending(&self, request: PendingTransferRequest) {
        let mut pending = self.pending_requests.write().await;
        pending.insert(request.request_id.clone(), request.clone());
        drop(pending);
        self.emit(TransferEvent::PendingApproval { request });
    }

    pub async fn get_pending(&self, request_id: &str) -> Option<PendingTransferRequest> {
        let pending = self.pending_requests.read().await;
        let request = pending.get(request_id)?;
        if request.is_expired(Utc::now()) {
            return None;
        }
        Some(request.clone())
    }

    /// Removes and returns a pending request, whether or not it has expired.
    pub async fn take_pending(&self, request_id: &str) -> Option<PendingTransferRequest> {
        self.pending_requests.write().await.remove(request_id)
    }

    /// Host-driven approval: removes the pending request, registers the new
    /// transfer, and records a resolution the sender's poll loop can observe.
    pub async fn approve_pending(&self, request_id: &str, transfer: Transfer, public_key: Option<Vec<u8>>) {
        self.take_pending(request_id).await;
        let transfer_id = transfer.id.clone();
        self.register_transfer(transfer).await;
        self.approvals.write().await.insert(
            request_id.to_string(),
            Resolution::Approved { transfer_id, public_key },
        );
        self.emit(TransferEvent::Accepted { request_id: request_id.to_string() });
    }

    pub async fn reject_pending(&self, request_id: &str) {
        self.take_pending(request_id).await;
        self.approvals.write().await.insert(request_id.to_string(), Resolution::Rejected);
        self.emit(TransferEvent::Rejected { request_id: request_id.to_string() });
    }

    pub async fn resolution(&self, request_id: &str) -> Option<Resolution> {
        self.approvals.read().await.get(request_id).cloned()
    }

    // ── Per-transfer file progress ──────────────────────────────────────

    pub async fn increment_files_done(&self, transfer_id: &str) -> usize {
        let mut files_done = self.files_done.write().await;
        let count = files_done.entry(transfer_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn files_done_count(&self, transfer_id: &str) -> usize {
        self.files_done.read().await.get(transfer_id).copied().unwrap_or(0)
    }

    async fn sweep_pending_requests(&self) {
        let now = Utc::now();
        let mut pending = self.pending_requests.write().await;
        let before = pending.len();
        pending.retain(|_, request| !request.is_expired(now));
        let evicted = before - pending.len();
        if evicted > 0 {
            info!("evicted {evicted} expired pending transfer request(s)");
        }
    }

    // ── Active transfers ────────────────────────────────────────────────

    pub async fn register_transfer(&self, transfer: Transfer) {
        let mut transfers = self.active_transfers.write().await;
        transfers.insert(transfer.id.clone(), transfer);
    }

    pub async fn get_transfer(&self, transfer_id: &str) -> Option<Transfer> {
        self.active_transfers.read().await.get(transfer_id).cloned()
    }

    pub async fn sender_id_of(&self, transfer_id: &str) -> Option<Uuid> {
        self.active_transfers
            .read()
            .await
            .get(transfer_id)
            .map(|t| t.sender_id)
    }

    /// Updates progress for `transfer_id`, emitting a snapshot after the map
    /// is released (§5: emissions happen after the local update completes,
    /// using a copy).
    pub async fn update_progress(&self, transfer_id: &str, bytes_transferred: u64) {
        let snapshot = {
            let mut transfers = self.active_transfers.write().await;
            let Some(transfer) = transfers.get_mut(transfer_id) else {
                return;
            };
            transfer.progress.bytes_transferred = bytes_transferred.min(transfer.progress.total_bytes);
            transfer.clone()
        };
        self.emit(TransferEvent::Progress { transfer: snapshot });
    }

    pub async fn set_status(&self, transfer_id: &str, status: TransferStatus, error_message: Option<String>) {
        let snapshot = {
            let mut transfers = self.active_transfers.write().await;
            let Some(transfer) = transfers.get_mut(transfer_id) else {
                return;
            };
            transfer.status = status;
            if status == TransferStatus::Completed {
                transfer.progress.bytes_transferred = transfer.progress.total_bytes;
            }
            transfer.error_message = error_message;
            transfer.clone()
        };
        if snapshot.status.is_terminal() {
            self.history.insert_transfer(&snapshot).await;
        }
        self.emit(TransferEvent::Progress { transfer: snapshot });
    }

    pub async fn cancel(&self, transfer_id: &str) -> bool {
        let found = {
            let transfers = self.active_transfers.read().await;
            transfers.contains_key(transfer_id)
        };
        if !found {
            return false;
        }
        self.set_status(transfer_id, TransferStatus::Cancelled, None).await;
        self.emit(TransferEvent::Cancelled { transfer_id: transfer_id.to_string() });
        true
    }

    // ── Encryption sessions ─────────────────────────────────────────────

    pub async fn establish_session(&self, local_id: Uuid, remote_id: Uuid, shared_secret: [u8; 32]) -> Arc<Channel> {
        let now = Utc::now();
        let session = EncryptionSession::new(local_id, remote_id, shared_secret, now);
        let channel = Arc::new(Channel::new(&shared_secret));
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_key(local_id, remote_id), SessionEntry { channel: channel.clone(), session });
        channel
    }

    pub async fn get_channel(&self, local_id: Uuid, remote_id: Uuid) -> Option<Arc<Channel>> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&session_key(local_id, remote_id))?;
        if !entry.session.is_live(Utc::now()) {
            return None;
        }
        Some(entry.channel.clone())
    }

    async fn sweep_sessions(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.session.is_live(now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("evicted {evicted} expired encryption session(s)");
        }
    }

    // ── Parallel chunk writers ──────────────────────────────────────────

    pub async fn register_parallel_writer(&self, transfer_id: String, state: Arc<ChunkWriterState>) {
        self.parallel_writers.write().await.insert(transfer_id, state);
    }

    pub async fn get_parallel_writer(&self, transfer_id: &str) -> Option<Arc<ChunkWriterState>> {
        self.parallel_writers.read().await.get(transfer_id).cloned()
    }

    pub async fn remove_parallel_writer(&self, transfer_id: &str) -> Option<Arc<ChunkWriterState>> {
        self.parallel_writers.write().await.remove(transfer_id)
    }

    /// Spawns the independent sweep tasks this state owns. Returned handles
    /// are aborted together on shutdown.
    pub fn spawn_sweeps(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let pending_state = self.clone();
        let pending_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PENDING_REQUEST_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                pending_state.sweep_pending_requests().await;
            }
        });

        let session_state = self.clone();
        let session_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                session_state.sweep_sessions().await;
            }
        });

        vec![pending_task, session_task]
    }
}

/// Builds a fresh [`Transfer`] record in `pending`/`connecting` status with
/// zeroed progress, the common shape both the inbound fast path and the
/// outbound sender use once a transfer id is settled.
pub fn new_transfer(
    id: String,
    sender_id: Uuid,
    receiver_id: Uuid,
    items: Vec<syndro_types::model::TransferItem>,
    status: TransferStatus,
) -> Transfer {
    let total_bytes = items.iter().map(|i| i.size).sum();
    Transfer {
        id,
        sender_id,
        receiver_id,
        items,
        status,
        progress: Progress { bytes_transferred: 0, total_bytes },
        created_at: Utc::now(),
        error_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::NullHistory;

    async fn test_state() -> Arc<EngineState> {
        let dir = tempfile::tempdir().unwrap();
        let trust = Arc::new(
            TrustStore::load(
                Arc::new(MemSecretStore::default()),
                Arc::new(MemPreferences::default()),
            )
            .await
            .unwrap(),
        );
        let checkpoints = Arc::new(CheckpointStore::new(dir.path()).await.unwrap());
        let (self_private_key, self_public_key) = syndro_crypto::new_key_pair();
        EngineState::new(
            EngineConfig {
                self_id: Uuid::new_v4(),
                self_name: "test".into(),
                download_root: dir.path().to_path_buf(),
                parallel: ParallelConfig::HIGH,
                max_file_size: EngineConfig::MAX_FILE_SIZE_DEFAULT,
                sequential_buffer_cap: EngineConfig::SEQUENTIAL_BUFFER_CAP_DEFAULT,
                self_private_key,
                self_public_key,
            },
            trust,
            checkpoints,
            Arc::new(NullHistory),
        )
    }

    #[derive(Default)]
    struct MemSecretStore {
        map: std::sync::Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl syndro_trust::SecretStore for MemSecretStore {
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
    struct MemPreferences {
        bools: std::sync::Mutex<HashMap<String, bool>>,
        strings: std::sync::Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl syndro_trust::Preferences for MemPreferences {
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

    #[tokio::test]
    async fn pending_request_roundtrip() {
        let state = test_state().await;
        let request = PendingTransferRequest {
            request_id: "r1".into(),
            transfer_id: "t1".into(),
            sender_id: Uuid::new_v4(),
            sender_name: "peer".into(),
            sender_token: "tok".into(),
            items: vec![],
            created_at: Utc::now(),
            sender_public_key: None,
            is_parallel: false,
            parallel_init: None,
            is_trusted: false,
        };
        state.register_pending(request.clone()).await;
        let fetched = state.get_pending("r1").await.unwrap();
        assert_eq!(fetched.request_id, "r1");
        let taken = state.take_pending("r1").await;
        assert!(taken.is_some());
        assert!(state.get_pending("r1").await.is_none());
    }

    #[tokio::test]
    async fn progress_never_exceeds_total() {
        let state = test_state().await;
        let sender_id = Uuid::new_v4();
        let receiver_id = Uuid::new_v4();
        let items = vec![syndro_types::model::TransferItem {
            name: "a.txt".into(),
            absolute_path: "/a.txt".into(),
            size: 10,
            is_directory: false,
            parent_relative_path: None,
            created_at: None,
            modified_at: None,
        }];
        let transfer = new_transfer("t1".into(), sender_id, receiver_id, items, TransferStatus::Transferring);
        state.register_transfer(transfer).await;
        state.update_progress("t1", 9999).await;
        let transfer = state.get_transfer("t1").await.unwrap();
        assert_eq!(transfer.progress.bytes_transferred, transfer.progress.total_bytes);
    }

    #[tokio::test]
    async fn completed_status_sets_full_progress_and_records_history() {
        let state = test_state().await;
        let items = vec![syndro_types::model::TransferItem {
            name: "a.txt".into(),
            absolute_path: "/a.txt".into(),
            size: 13,
            is_directory: false,
            parent_relative_path: None,
            created_at: None,
            modified_at: None,
        }];
        let transfer = new_transfer("t2".into(), Uuid::new_v4(), Uuid::new_v4(), items, TransferStatus::Transferring);
        state.register_transfer(transfer).await;
        state.set_status("t2", TransferStatus::Completed, None).await;
        let transfer = state.get_transfer("t2").await.unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.progress.bytes_transferred, 13);
    }

    #[tokio::test]
    async fn session_roundtrip_and_expiry() {
        let state = test_state().await;
        let local = Uuid::new_v4();
        let remote = Uuid::new_v4();
        let secret = [7u8; 32];
        state.establish_session(local, remote, secret).await;
        assert!(state.get_channel(local, remote).await.is_some());
        assert!(state.get_channel(remote, local).await.is_none());
    }
}
