//! The inbound HTTP surface (spec §4.6.1): ten endpoints covering discovery
//! handshake, initiate/approval, and both transfer modes.

use crate::error::TransferError;
use crate::parallel::ChunkWriterState;
use crate::state::{EngineState, new_transfer};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, http::Method, http::HeaderName, http::header::CONTENT_TYPE};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use syndro_types::model::{Platform, TransferStatus};
use syndro_types::wire::*;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

pub type AppState = Arc<EngineState>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("x-transfer-id"),
            HeaderName::from_static("x-sender-id"),
            HeaderName::from_static("x-file-name"),
            HeaderName::from_static("x-file-size"),
            HeaderName::from_static("x-original-size"),
            HeaderName::from_static("x-file-hash"),
            HeaderName::from_static("x-chunk-index"),
            HeaderName::from_static("x-encrypted"),
        ])
        .allow_credentials(false);

    Router::new()
        .route("/syndro.json", get(syndro_info))
        .route("/key-exchange", post(key_exchange))
        .route("/transfer/initiate", post(initiate))
        .route("/transfer/approval/{request_id}", get(approval_status))
        .route("/transfer/upload", post(upload))
        .route("/transfer/upload-encrypted", post(upload_encrypted))
        .route("/transfer/parallel/initiate", post(parallel_initiate))
        .route("/transfer/chunk", post(chunk))
        .route("/transfer/parallel/complete", post(parallel_complete))
        .route("/transfer/status/{id}", get(status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn platform_str(platform: Platform) -> &'static str {
    match platform {
        Platform::Android => "android",
        Platform::Windows => "windows",
        Platform::Linux => "linux",
        Platform::Macos => "macos",
        Platform::Ios => "ios",
        Platform::Unknown => "unknown",
    }
}

async fn syndro_info(State(state): State<AppState>) -> Json<SyndroInfo> {
    Json(SyndroInfo {
        id: state.config.self_id,
        name: state.config.self_name.clone(),
        os: std::env::consts::OS.to_string(),
        platform: Some(platform_str(Platform::current()).to_string()),
        port: state.http_port(),
        version: "2.0".to_string(),
        encryption: true,
        public_key: Some(state.config.self_public_key.to_vec()),
    })
}

async fn key_exchange(
    State(state): State<AppState>,
    Json(req): Json<KeyExchangeRequest>,
) -> Result<Json<KeyExchangeResponse>, TransferError> {
    let secret = syndro_crypto::derive(&state.config.self_private_key, &req.public_key)?;
    state.establish_session(state.config.self_id, req.device_id, secret).await;
    Ok(Json(KeyExchangeResponse {
        device_id: state.config.self_id,
        public_key: state.config.self_public_key.to_vec(),
    }))
}

/// `POST /transfer/initiate` (spec §4.6.3): trusted senders with
/// auto-accept go straight to an active Transfer; everyone else waits on a
/// [`syndro_types::model::PendingTransferRequest`].
async fn initiate(
    State(state): State<AppState>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, TransferError> {
    let total_size: u64 = req.items.iter().map(|i| i.size).sum();
    if total_size > state.config.max_file_size {
        return Err(TransferError::FileTooLarge);
    }

    let trusted = state.trust.is_trusted(req.sender_id, &req.sender_token).await;
    if trusted && state.trust.auto_accept_trusted().await {
        let mut public_key = None;
        if let Some(their_pub) = &req.public_key {
            let secret = syndro_crypto::derive(&state.config.self_private_key, their_pub)?;
            state.establish_session(state.config.self_id, req.sender_id, secret).await;
            public_key = Some(state.config.self_public_key.to_vec());
        }
        let transfer = new_transfer(
            req.id.clone(),
            req.sender_id,
            state.config.self_id,
            req.items,
            TransferStatus::Pending,
        );
        state.register_transfer(transfer).await;
        return Ok(Json(InitiateResponse::Accepted {
            transfer_id: req.id,
            authorized: true,
            encryption: public_key.is_some(),
            public_key,
        }));
    }

    let request_id = Uuid::new_v4().to_string();
    let pending = syndro_types::model::PendingTransferRequest {
        request_id: request_id.clone(),
        transfer_id: req.id,
        sender_id: req.sender_id,
        sender_name: req.sender_name,
        sender_token: req.sender_token,
        items: req.items,
        created_at: chrono::Utc::now(),
        sender_public_key: req.public_key.and_then(|k| k.try_into().ok()),
        is_parallel: false,
        parallel_init: None,
        is_trusted: trusted,
    };
    state.register_pending(pending).await;
    Ok(Json(InitiateResponse::PendingApproval { request_id }))
}

async fn approval_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<ApprovalResponse> {
    if let Some(resolution) = state.resolution(&request_id).await {
        return Json(match resolution {
            crate::state::Resolution::Approved { public_key, .. } => ApprovalResponse::Approved { public_key },
            crate::state::Resolution::Rejected => ApprovalResponse::Rejected,
        });
    }
    if state.get_pending(&request_id).await.is_some() {
        return Json(ApprovalResponse::Pending);
    }
    Json(ApprovalResponse::Expired)
}

/// `POST /transfer/parallel/initiate` (spec §4.6.4): mirrors `initiate`'s
/// trust fast path, but a successful fast path allocates the chunk writer
/// immediately since there is no separate ECDH/approval round trip to hang it off.
async fn parallel_initiate(
    State(state): State<AppState>,
    Json(req): Json<ParallelInitiateRequest>,
) -> Result<Json<ParallelInitiateResponse>, TransferError> {
    if req.file_size > state.config.max_file_size {
        return Err(TransferError::FileTooLarge);
    }

    let trusted = state.trust.is_trusted(req.sender_id, &req.sender_token).await;
    if trusted && state.trust.auto_accept_trusted().await {
        let sanitized = syndro_store::sanitize_name(&req.file_name)
            .map_err(|_| TransferError::InvalidInput("invalid file name".into()))?;
        let final_path = state.config.download_root.join(&sanitized);
        let writer = Arc::new(
            ChunkWriterState::open(
                final_path.clone(),
                req.file_size,
                state.config.parallel.chunk_size,
                req.sender_id,
                sanitized.clone(),
            )
            .await?,
        );
        state.register_parallel_writer(req.transfer_id.clone(), writer).await;

        let item = syndro_types::model::TransferItem {
            name: sanitized,
            absolute_path: final_path.display().to_string(),
            size: req.file_size,
            is_directory: false,
            parent_relative_path: None,
            created_at: None,
            modified_at: None,
        };
        let transfer = new_transfer(
            req.transfer_id,
            req.sender_id,
            state.config.self_id,
            vec![item],
            TransferStatus::Pending,
        );
        state.register_transfer(transfer).await;
        return Ok(Json(ParallelInitiateResponse::Success));
    }

    let request_id = Uuid::new_v4().to_string();
    let items = vec![syndro_types::model::TransferItem {
        name: req.file_name.clone(),
        absolute_path: req.file_name.clone(),
        size: req.file_size,
        is_directory: false,
        parent_relative_path: None,
        created_at: None,
        modified_at: None,
    }];
    let parallel_init = serde_json::to_value(&req).map_err(|e| TransferError::InvalidInput(e.to_string()))?;
    let pending = syndro_types::model::PendingTransferRequest {
        request_id: request_id.clone(),
        transfer_id: req.transfer_id,
        sender_id: req.sender_id,
        sender_name: req.sender_name,
        sender_token: req.sender_token,
        items,
        created_at: chrono::Utc::now(),
        sender_public_key: None,
        is_parallel: true,
        parallel_init: Some(parallel_init),
        is_trusted: trusted,
    };
    state.register_pending(pending).await;
    Ok(Json(ParallelInitiateResponse::PendingApproval { request_id }))
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<String, TransferError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| TransferError::InvalidInput(format!("missing header {name}")))
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Uuid, TransferError> {
    header_str(headers, name)?
        .parse()
        .map_err(|_| TransferError::InvalidInput(format!("invalid uuid header {name}")))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Result<u64, TransferError> {
    header_str(headers, name)?
        .parse()
        .map_err(|_| TransferError::InvalidInput(format!("invalid integer header {name}")))
}

async fn resolve_upload_target(
    state: &AppState,
    transfer_id: &str,
    sender_id: Uuid,
    file_name: &str,
) -> Result<std::path::PathBuf, TransferError> {
    let transfer = state.get_transfer(transfer_id).await.ok_or(TransferError::Unauthorized)?;
    if transfer.sender_id != sender_id {
        return Err(TransferError::Unauthorized);
    }
    let sanitized = syndro_store::sanitize_name(file_name)
        .map_err(|_| TransferError::InvalidInput("invalid file name".into()))?;
    if sanitized != file_name {
        warn!("upload filename {file_name:?} sanitized to {sanitized:?}");
    }
    let final_path = state.config.download_root.join(&sanitized);
    if !syndro_store::is_within(&state.config.download_root, &final_path) {
        return Err(TransferError::PathTraversal);
    }
    Ok(final_path)
}

/// `POST /transfer/upload` (spec §4.6.3): plain-bytes streaming upload, no
/// per-chunk encryption. Used when the pair never performed ECDH.
async fn upload(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Result<StatusCode, TransferError> {
    let transfer_id = header_str(&headers, "x-transfer-id")?;
    let sender_id = header_uuid(&headers, "x-sender-id")?;
    let file_name = header_str(&headers, "x-file-name")?;
    let file_size = header_u64(&headers, "x-file-size")?;
    if file_size > state.config.max_file_size {
        return Err(TransferError::FileTooLarge);
    }

    let final_path = resolve_upload_target(&state, &transfer_id, sender_id, &file_name).await?;
    state.set_status(&transfer_id, TransferStatus::Transferring, None).await;

    let mut writer = syndro_store::ChunkWriter::open(&final_path, file_size).await?;
    let mut stream = http_body_util::BodyStream::new(body);
    let mut written = 0u64;
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| TransferError::Network(e.to_string()))?;
        let Ok(data) = frame.into_data() else { continue };
        writer.write_sequential(&data).await?;
        written += data.len() as u64;
        state.update_progress(&transfer_id, written).await;
    }

    writer.finalize().await?;
    state.set_status(&transfer_id, TransferStatus::Completed, None).await;
    state.increment_files_done(&transfer_id).await;
    Ok(StatusCode::OK)
}

/// Extracts `[len:u32 BE][frame]` records one at a time from `buf`, returning
/// the number of bytes a complete record consumes so the caller can drain it.
fn take_frame(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + len {
        return None;
    }
    Some((len, 4 + len))
}

/// `POST /transfer/upload-encrypted` (spec §4.6.5): a sequence of
/// length-prefixed AES-GCM records, decrypted and hashed as they stream in.
async fn upload_encrypted(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, TransferError> {
    let transfer_id = header_str(&headers, "x-transfer-id")?;
    let sender_id = header_uuid(&headers, "x-sender-id")?;
    let file_name = header_str(&headers, "x-file-name")?;
    let original_size = header_u64(&headers, "x-original-size")?;
    let expected_hash = header_str(&headers, "x-file-hash")?;
    if original_size > state.config.max_file_size {
        return Err(TransferError::FileTooLarge);
    }

    let final_path = resolve_upload_target(&state, &transfer_id, sender_id, &file_name).await?;
    let channel = state
        .get_channel(state.config.self_id, sender_id)
        .await
        .ok_or(TransferError::Unauthorized)?;
    state.set_status(&transfer_id, TransferStatus::Transferring, None).await;

    let mut writer = syndro_store::ChunkWriter::open(&final_path, original_size).await?;
    let mut hasher = Sha256::new();
    let mut buf: Vec<u8> = Vec::new();
    let cap = state.config.sequential_buffer_cap;
    let mut stream = http_body_util::BodyStream::new(body);
    let mut written = 0u64;

    let result: Result<(), TransferError> = async {
        loop {
            while let Some((len, consumed)) = take_frame(&buf) {
                let plaintext = channel.decrypt_chunk(&buf[4..4 + len])?;
                writer.write_sequential(&plaintext).await?;
                hasher.update(&plaintext);
                written += plaintext.len() as u64;
                buf.drain(..consumed);
                state.update_progress(&transfer_id, written).await;
            }
            if buf.len() > cap {
                return Err(TransferError::BufferOverflow);
            }
            match stream.next().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        buf.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => return Err(TransferError::Network(e.to_string())),
                None => break,
            }
        }
        if !buf.is_empty() {
            return Err(TransferError::InvalidInput("trailing partial frame".into()));
        }
        let digest = hex::encode(hasher.finalize_reset());
        if digest != expected_hash {
            return Err(TransferError::HashMismatch);
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        writer.abort().await;
        state.set_status(&transfer_id, TransferStatus::Failed, Some(e.to_string())).await;
        return Err(e);
    }

    writer.finalize().await?;
    state.set_status(&transfer_id, TransferStatus::Completed, None).await;
    state.increment_files_done(&transfer_id).await;
    Ok(StatusCode::OK)
}

/// `POST /transfer/chunk` (spec §4.6.4): one indexed chunk of a parallel
/// transfer, optionally encrypted.
async fn chunk(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Result<StatusCode, TransferError> {
    let transfer_id = header_str(&headers, "x-transfer-id")?;
    let index: u32 = header_str(&headers, "x-chunk-index")?
        .parse()
        .map_err(|_| TransferError::InvalidInput("invalid chunk index".into()))?;
    let encrypted = headers
        .get("x-encrypted")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let writer = state.get_parallel_writer(&transfer_id).await.ok_or(TransferError::NotFound)?;

    let plaintext = if encrypted {
        let sender_id = writer.sender_id;
        let channel = state
            .get_channel(state.config.self_id, sender_id)
            .await
            .ok_or(TransferError::Unauthorized)?;
        channel.decrypt_chunk(&body)?
    } else {
        body.to_vec()
    };

    writer.write_chunk(index, &plaintext).await?;
    let received = writer.bytes_received().await;
    state.update_progress(&transfer_id, received).await;
    Ok(StatusCode::OK)
}

/// `POST /transfer/parallel/complete` (spec §4.6.4): verifies completeness
/// and integrity before the receive becomes visible under its final name.
async fn parallel_complete(
    State(state): State<AppState>,
    Json(req): Json<ParallelCompleteRequest>,
) -> Result<Json<ParallelCompleteResponse>, TransferError> {
    let writer = state
        .get_parallel_writer(&req.transfer_id)
        .await
        .ok_or(TransferError::NotFound)?;

    if !writer.is_complete().await {
        return Ok(Json(ParallelCompleteResponse {
            success: false,
            file_path: None,
            file_size: None,
            missing: writer.missing().await,
        }));
    }

    let temp_path = writer.temp_path().await;
    let digest = syndro_crypto::hash_file(&temp_path).await?;
    if digest != req.file_hash {
        writer.abort().await;
        state.remove_parallel_writer(&req.transfer_id).await;
        state
            .set_status(&req.transfer_id, TransferStatus::Failed, Some("hash mismatch".into()))
            .await;
        return Err(TransferError::HashMismatch);
    }

    let final_path = writer.finalize().await?;
    state.remove_parallel_writer(&req.transfer_id).await;
    state.set_status(&req.transfer_id, TransferStatus::Completed, None).await;
    state.increment_files_done(&req.transfer_id).await;

    Ok(Json(ParallelCompleteResponse {
        success: true,
        file_path: Some(final_path.display().to_string()),
        file_size: Some(writer.total_size),
        missing: Vec::new(),
    }))
}

async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<StatusResponse>, TransferError> {
    let transfer = state.get_transfer(&id).await.ok_or(TransferError::NotFound)?;
    Ok(Json(StatusResponse {
        id: transfer.id,
        status: transfer.status,
        progress: transfer.progress,
        error_message: transfer.error_message,
    }))
}
