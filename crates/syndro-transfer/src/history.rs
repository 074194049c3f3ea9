use syndro_types::model::Transfer;

/// Best-effort historical record of transfers (spec §6's `insertTransfer`
/// collaborator). A failure here never fails a transfer — callers log and
/// continue, matching the propagation policy in §7.
#[async_trait::async_trait]
pub trait TransferHistory: Send + Sync {
    async fn insert_transfer(&self, transfer: &Transfer);
}

/// No-op implementation for hosts that don't keep a transfer history.
pub struct NullHistory;

#[async_trait::async_trait]
impl TransferHistory for NullHistory {
    async fn insert_transfer(&self, _transfer: &Transfer) {}
}
