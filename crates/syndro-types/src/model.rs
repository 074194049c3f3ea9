use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Windows,
    Linux,
    Macos,
    Ios,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Unknown
        }
    }
}

/// A peer discovered on the LAN, or self-description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub ip: std::net::Ipv4Addr,
    pub port: u16,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub name: String,
    pub absolute_path: String,
    pub size: u64,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Connecting,
    Transferring,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub items: Vec<TransferItem>,
    pub status: TransferStatus,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransferRequest {
    pub request_id: String,
    /// The transfer id the requester settled on (sender-supplied for a
    /// sequential request, the parallel-init's id for a parallel one), kept
    /// so approval registers the same Transfer the requester expects.
    pub transfer_id: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_token: String,
    pub items: Vec<TransferItem>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<[u8; 32]>,
    pub is_parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_init: Option<serde_json::Value>,
    pub is_trusted: bool,
}

impl PendingTransferRequest {
    /// Requests older than this are evicted and resolve to `expired`.
    pub const TTL_SECS: i64 = 5 * 60;

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at).num_seconds() >= Self::TTL_SECS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDevice {
    pub sender_id: Uuid,
    pub sender_name: String,
    pub token: String,
    pub trusted_at: DateTime<Utc>,
}

impl TrustedDevice {
    /// Entries older than this are pruned by the daily sweep.
    pub const MAX_AGE_DAYS: i64 = 90;

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.trusted_at).num_days() >= Self::MAX_AGE_DAYS
    }
}

#[derive(Clone)]
pub struct EncryptionSession {
    pub session_id: String,
    pub shared_secret: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EncryptionSession {
    /// Sessions live for one hour after creation.
    pub const LIFETIME_SECS: i64 = 60 * 60;

    pub fn new(local_id: Uuid, remote_id: Uuid, shared_secret: [u8; 32], now: DateTime<Utc>) -> Self {
        Self {
            session_id: format!("{local_id}-{remote_id}"),
            shared_secret,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(Self::LIFETIME_SECS),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for EncryptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSession")
            .field("session_id", &self.session_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub transfer_id: String,
    pub file_id: String,
    pub bytes_transferred: u64,
    pub timestamp: DateTime<Utc>,
    pub current_file_index: usize,
    pub total_files: usize,
    pub is_valid: bool,
}

/// Deterministic transfer id: a 64-bit SHA-256 prefix of the items manifest,
/// enabling resume across restarts. Computed by callers via `syndro_crypto`;
/// this module only defines the input shape.
pub fn transfer_id_manifest(sender_id: Uuid, receiver_id: Uuid, items: &[TransferItem]) -> String {
    let names = items
        .iter()
        .map(|i| format!("{}:{}", i.name, i.size))
        .collect::<Vec<_>>()
        .join(",");
    format!("{sender_id}->{receiver_id}|{names}")
}
