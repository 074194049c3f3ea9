//! Host-driven resolution of a [`PendingTransferRequest`] (spec §4.6.3).
//!
//! These are not HTTP endpoints: the decision to approve or reject a pending
//! transfer is made by the embedding application (a UI prompt, a policy
//! engine) and relayed into the engine through these two calls.

use crate::error::TransferError;
use crate::parallel::ChunkWriterState;
use crate::state::{EngineState, new_transfer};
use chrono::Utc;
use std::sync::Arc;
use syndro_types::model::{TransferItem, TransferStatus, TrustedDevice};
use syndro_types::wire::ParallelInitiateRequest;
use uuid::Uuid;

/// Approves a pending request, optionally trusting the sender for future
/// fast-path transfers. Performs ECDH if the sender attached a public key,
/// and for parallel requests allocates the chunk writer the sender will
/// start posting to immediately after this call returns.
pub async fn approve(
    state: &Arc<EngineState>,
    request_id: &str,
    trust_sender: bool,
) -> Result<String, TransferError> {
    let request = state.get_pending(request_id).await.ok_or(TransferError::NotFound)?;

    if trust_sender {
        state
            .trust
            .trust(TrustedDevice {
                sender_id: request.sender_id,
                sender_name: request.sender_name.clone(),
                token: request.sender_token.clone(),
                trusted_at: Utc::now(),
            })
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;
    }

    let mut public_key = None;
    if let Some(their_pub) = request.sender_public_key {
        let secret = syndro_crypto::derive(&state.config.self_private_key, &their_pub)?;
        state.establish_session(state.config.self_id, request.sender_id, secret).await;
        public_key = Some(state.config.self_public_key.to_vec());
    }

    let transfer = if request.is_parallel {
        let parallel_init: ParallelInitiateRequest = request
            .parallel_init
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| TransferError::InvalidInput("missing parallel init payload".into()))?;

        let sanitized = syndro_store::sanitize_name(&parallel_init.file_name)
            .map_err(|_| TransferError::InvalidInput("invalid file name".into()))?;
        let final_path = state.config.download_root.join(&sanitized);
        let writer = Arc::new(
            ChunkWriterState::open(
                final_path.clone(),
                parallel_init.file_size,
                state.config.parallel.chunk_size,
                parallel_init.sender_id,
                sanitized.clone(),
            )
            .await?,
        );
        state.register_parallel_writer(request.transfer_id.clone(), writer).await;

        let item = TransferItem {
            name: sanitized,
            absolute_path: final_path.display().to_string(),
            size: parallel_init.file_size,
            is_directory: false,
            parent_relative_path: None,
            created_at: None,
            modified_at: None,
        };
        new_transfer(
            request.transfer_id.clone(),
            request.sender_id,
            state.config.self_id,
            vec![item],
            TransferStatus::Pending,
        )
    } else {
        new_transfer(
            request.transfer_id.clone(),
            request.sender_id,
            state.config.self_id,
            request.items.clone(),
            TransferStatus::Pending,
        )
    };

    let transfer_id = transfer.id.clone();
    state.approve_pending(request_id, transfer, public_key).await;
    Ok(transfer_id)
}

pub async fn reject(state: &Arc<EngineState>, request_id: &str) -> Result<(), TransferError> {
    if state.get_pending(request_id).await.is_none() {
        return Err(TransferError::NotFound);
    }
    state.reject_pending(request_id).await;
    Ok(())
}
