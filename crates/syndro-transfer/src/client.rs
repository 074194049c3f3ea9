//! The outbound sender state machine (spec §4.6.2): initiate, optionally
//! poll for approval, optionally key-exchange, then upload sequentially or
//! in parallel, saving a checkpoint after each item.

use crate::error::TransferError;
use crate::state::EngineState;
use chrono::Utc;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use syndro_types::model::{Checkpoint, TransferItem, TransferStatus};
use syndro_types::wire::*;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};
use uuid::Uuid;

const INITIATE_TIMEOUT: Duration = Duration::from_secs(15);
const APPROVAL_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const APPROVAL_TOTAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const KEY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything needed to drive one outbound transfer to a single receiver.
pub struct OutboundRequest {
    pub receiver_ip: std::net::Ipv4Addr,
    pub receiver_port: u16,
    pub receiver_id: Uuid,
    pub items: Vec<TransferItem>,
    pub sender_token: String,
}

/// Retries an idempotent call up to [`RETRY_ATTEMPTS`] times with a fixed
/// delay, on network/timeout failure or a 5xx response. `f` must be safe to
/// call more than once (spec §4.6.2's retry policy applies only to
/// `/transfer/initiate` and approval polls).
async fn with_retry<T, F, Fut>(mut f: F) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransferError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e @ (TransferError::Network(_) | TransferError::Timeout)) => {
                attempt += 1;
                if attempt >= RETRY_ATTEMPTS {
                    return Err(e);
                }
                warn!("retrying after transient error: {e}");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn base_url(ip: std::net::Ipv4Addr, port: u16) -> String {
    format!("http://{ip}:{port}")
}

fn map_reqwest_err(e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::Timeout
    } else {
        TransferError::Network(e.to_string())
    }
}

async fn call_initiate(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    public_key: Option<Vec<u8>>,
) -> Result<InitiateResponse, TransferError> {
    let body = InitiateRequest {
        id: transfer_id.to_string(),
        sender_id: state.config.self_id,
        sender_name: state.config.self_name.clone(),
        sender_token: req.sender_token.clone(),
        receiver_id: req.receiver_id,
        items: req.items.clone(),
        public_key,
    };
    let url = format!("{}/transfer/initiate", base_url(req.receiver_ip, req.receiver_port));
    with_retry(|| async {
        let resp = state
            .http
            .post(&url)
            .timeout(INITIATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if resp.status().is_server_error() {
            return Err(TransferError::Network(format!("server error: {}", resp.status())));
        }
        resp.json::<InitiateResponse>().await.map_err(map_reqwest_err)
    })
    .await
}

/// Polls `/transfer/approval/{id}` every 500 ms until a terminal answer or
/// the 5-minute total timeout, at which point the request is treated as
/// `expired` rather than surfacing a hard error.
async fn poll_approval(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    request_id: &str,
) -> Result<ApprovalResponse, TransferError> {
    let url = format!(
        "{}/transfer/approval/{}",
        base_url(req.receiver_ip, req.receiver_port),
        request_id
    );
    let deadline = tokio::time::Instant::now() + APPROVAL_TOTAL_TIMEOUT;
    loop {
        let response = with_retry(|| async {
            let resp = state
                .http
                .get(&url)
                .timeout(APPROVAL_POLL_TIMEOUT)
                .send()
                .await
                .map_err(map_reqwest_err)?;
            if resp.status().is_server_error() {
                return Err(TransferError::Network(format!("server error: {}", resp.status())));
            }
            resp.json::<ApprovalResponse>().await.map_err(map_reqwest_err)
        })
        .await?;

        if !matches!(response, ApprovalResponse::Pending) {
            return Ok(response);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(ApprovalResponse::Expired);
        }
        tokio::time::sleep(APPROVAL_POLL_INTERVAL).await;
    }
}

async fn call_parallel_initiate(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    item: &TransferItem,
) -> Result<ParallelInitiateResponse, TransferError> {
    let body = ParallelInitiateRequest {
        transfer_id: transfer_id.to_string(),
        file_name: item.name.clone(),
        file_size: item.size,
        sender_id: state.config.self_id,
        sender_name: state.config.self_name.clone(),
        sender_token: req.sender_token.clone(),
    };
    let url = format!("{}/transfer/parallel/initiate", base_url(req.receiver_ip, req.receiver_port));
    with_retry(|| async {
        let resp = state
            .http
            .post(&url)
            .timeout(INITIATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if resp.status().is_server_error() {
            return Err(TransferError::Network(format!("server error: {}", resp.status())));
        }
        resp.json::<ParallelInitiateResponse>().await.map_err(map_reqwest_err)
    })
    .await
}

async fn call_parallel_complete(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    file_hash: &str,
) -> Result<ParallelCompleteResponse, TransferError> {
    let body = ParallelCompleteRequest { transfer_id: transfer_id.to_string(), file_hash: file_hash.to_string() };
    let url = format!("{}/transfer/parallel/complete", base_url(req.receiver_ip, req.receiver_port));
    let resp = state
        .http
        .post(&url)
        .timeout(INITIATE_TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;
    resp.json::<ParallelCompleteResponse>().await.map_err(map_reqwest_err)
}

async fn read_chunk_at(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
    let mut file = tokio::fs::File::open(path).await.map_err(syndro_store::FileStoreError::from)?;
    file.seek(std::io::SeekFrom::Start(offset)).await.map_err(syndro_store::FileStoreError::from)?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await.map_err(syndro_store::FileStoreError::from)?;
    Ok(buf)
}

async fn send_chunk(
    state: &Arc<EngineState>,
    base_url: &str,
    transfer_id: &str,
    index: u32,
    encrypted: bool,
    body: Vec<u8>,
) -> Result<(), TransferError> {
    let url = format!("{base_url}/transfer/chunk");
    let resp = state
        .http
        .post(&url)
        .header("x-transfer-id", transfer_id)
        .header("x-chunk-index", index.to_string())
        .header("x-encrypted", if encrypted { "true" } else { "false" })
        .body(body)
        .send()
        .await
        .map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        return Err(TransferError::Network(format!("chunk {index} rejected: {}", resp.status())));
    }
    Ok(())
}

/// Drives a parallel transfer end to end (spec §4.6.4): a single large item
/// split into fixed-size chunks, uploaded concurrently up to
/// `ParallelConfig::connections`, then verified whole against `fileHash`.
async fn drive_parallel_transfer(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
) -> Result<(), TransferError> {
    let item = req.items[0].clone();
    let initiate_response = call_parallel_initiate(state, req, transfer_id, &item).await?;

    let authorized = match initiate_response {
        ParallelInitiateResponse::Success => true,
        ParallelInitiateResponse::PendingApproval { request_id } => {
            match poll_approval(state, req, &request_id).await? {
                ApprovalResponse::Approved { .. } => true,
                ApprovalResponse::Rejected => return Err(TransferError::Unauthorized),
                ApprovalResponse::Expired | ApprovalResponse::Pending => return Err(TransferError::Timeout),
            }
        }
    };
    if !authorized {
        return Err(TransferError::Unauthorized);
    }

    state.set_status(transfer_id, TransferStatus::Transferring, None).await;

    let channel = state.get_channel(state.config.self_id, req.receiver_id).await;
    let path = Path::new(&item.absolute_path).to_path_buf();
    let file_hash = syndro_crypto::hash_file(&path).await?;
    let chunk_size = state.config.parallel.chunk_size;
    let total_chunks = state.config.parallel.total_chunks(item.size);
    let connections = state.config.parallel.connections.max(1);
    let base = base_url(req.receiver_ip, req.receiver_port);

    let results: Vec<Result<(), TransferError>> = futures_util::stream::iter(0..total_chunks)
        .map(|index| {
            let state = state.clone();
            let channel = channel.clone();
            let path = path.clone();
            let base = base.clone();
            let transfer_id = transfer_id.to_string();
            let item_size = item.size;
            async move {
                let offset = index as u64 * chunk_size;
                let len = chunk_size.min(item_size.saturating_sub(offset));
                let plaintext = read_chunk_at(&path, offset, len).await?;
                let (body, encrypted) = match &channel {
                    Some(channel) => (channel.encrypt_chunk(&plaintext)?, true),
                    None => (plaintext, false),
                };
                send_chunk(&state, &base, &transfer_id, index, encrypted, body).await
            }
        })
        .buffer_unordered(connections)
        .collect()
        .await;
    for r in results {
        r?;
    }

    let complete = call_parallel_complete(state, req, transfer_id, &file_hash).await?;
    if !complete.success {
        return Err(TransferError::InvalidInput(format!(
            "parallel transfer incomplete, missing chunks {:?}",
            complete.missing
        )));
    }

    state.increment_files_done(transfer_id).await;
    state
        .checkpoints
        .save(&Checkpoint {
            transfer_id: transfer_id.to_string(),
            file_id: item.name.clone(),
            bytes_transferred: item.size,
            timestamp: Utc::now(),
            current_file_index: 1,
            total_files: 1,
            is_valid: true,
        })
        .await?;
    info!("uploaded {} in parallel ({} bytes, {total_chunks} chunks)", item.name, item.size);
    Ok(())
}

/// Performs a standalone `/key-exchange` call and establishes the resulting
/// session, for callers that want encryption ready before a transfer starts
/// rather than relying on the key piggybacked onto `/transfer/initiate`.
pub async fn key_exchange(
    state: &Arc<EngineState>,
    receiver_ip: std::net::Ipv4Addr,
    receiver_port: u16,
    receiver_id: Uuid,
) -> Result<Arc<syndro_crypto::Channel>, TransferError> {
    let url = format!("{}/key-exchange", base_url(receiver_ip, receiver_port));
    let body = KeyExchangeRequest {
        device_id: state.config.self_id,
        public_key: state.config.self_public_key.to_vec(),
    };
    let resp = state
        .http
        .post(&url)
        .timeout(KEY_EXCHANGE_TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(map_reqwest_err)?;
    let parsed: KeyExchangeResponse = resp.json().await.map_err(map_reqwest_err)?;
    let secret = syndro_crypto::derive(&state.config.self_private_key, &parsed.public_key)?;
    Ok(state.establish_session(state.config.self_id, receiver_id, secret).await)
}

/// Drives one outbound transfer end to end, saving a checkpoint after each
/// item so a crashed process can resume from `currentFileIndex`.
pub async fn send_transfer(state: Arc<EngineState>, req: OutboundRequest) -> Result<(), TransferError> {
    let transfer_id = syndro_crypto::transfer_id(&syndro_types::model::transfer_id_manifest(
        state.config.self_id,
        req.receiver_id,
        &req.items,
    ));

    let transfer = crate::state::new_transfer(
        transfer_id.clone(),
        state.config.self_id,
        req.receiver_id,
        req.items.clone(),
        TransferStatus::Connecting,
    );
    state.register_transfer(transfer).await;

    let resume_from = match state.checkpoints.load(&transfer_id).await {
        Ok(Some(checkpoint)) => checkpoint.current_file_index,
        _ => 0,
    };

    let use_parallel = resume_from == 0
        && req.items.len() == 1
        && state.config.parallel.should_use_parallel(req.items.len(), req.items[0].size);

    let result = if use_parallel {
        drive_parallel_transfer(&state, &req, &transfer_id).await
    } else {
        drive_transfer(&state, &req, &transfer_id, resume_from).await
    };

    match &result {
        Ok(()) => {
            state.set_status(&transfer_id, TransferStatus::Completed, None).await;
            let _ = state.checkpoints.clear(&transfer_id).await;
        }
        Err(e) => {
            let already_cancelled = matches!(
                state.get_transfer(&transfer_id).await.map(|t| t.status),
                Some(TransferStatus::Cancelled)
            );
            if !already_cancelled {
                state.set_status(&transfer_id, TransferStatus::Failed, Some(e.to_string())).await;
            }
        }
    }
    result
}

async fn drive_transfer(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    resume_from: usize,
) -> Result<(), TransferError> {
    let initiate_response = call_initiate(state, req, transfer_id, Some(state.config.self_public_key.to_vec())).await?;

    let (encryption_key, authorized) = match initiate_response {
        InitiateResponse::Accepted { authorized, public_key, .. } => (public_key, authorized),
        InitiateResponse::PendingApproval { request_id } => {
            match poll_approval(state, req, &request_id).await? {
                ApprovalResponse::Approved { public_key } => (public_key, true),
                ApprovalResponse::Rejected => {
                    return Err(TransferError::Unauthorized);
                }
                ApprovalResponse::Expired | ApprovalResponse::Pending => {
                    return Err(TransferError::Timeout);
                }
            }
        }
    };
    if !authorized {
        return Err(TransferError::Unauthorized);
    }

    let channel = if let Some(their_pub) = &encryption_key {
        let secret = syndro_crypto::derive(&state.config.self_private_key, their_pub)?;
        Some(state.establish_session(state.config.self_id, req.receiver_id, secret).await)
    } else {
        None
    };

    state.set_status(transfer_id, TransferStatus::Transferring, None).await;

    let total_files = req.items.len();
    let mut bytes_so_far: u64 = req.items[..resume_from].iter().map(|i| i.size).sum();
    for (index, item) in req.items.iter().enumerate().skip(resume_from) {
        upload_item(state, req, transfer_id, item, channel.clone()).await?;
        bytes_so_far += item.size;
        state.increment_files_done(transfer_id).await;

        state
            .checkpoints
            .save(&Checkpoint {
                transfer_id: transfer_id.to_string(),
                file_id: item.name.clone(),
                bytes_transferred: bytes_so_far,
                timestamp: Utc::now(),
                current_file_index: index + 1,
                total_files,
                is_valid: true,
            })
            .await?;
    }

    Ok(())
}

async fn upload_item(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    item: &TransferItem,
    channel: Option<Arc<syndro_crypto::Channel>>,
) -> Result<(), TransferError> {
    let path = Path::new(&item.absolute_path);
    match channel {
        Some(channel) => upload_encrypted(state, req, transfer_id, item, path, channel).await,
        None => upload_plain(state, req, transfer_id, item, path).await,
    }
}

async fn upload_plain(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    item: &TransferItem,
    path: &Path,
) -> Result<(), TransferError> {
    let url = format!("{}/transfer/upload", base_url(req.receiver_ip, req.receiver_port));
    let body = tokio::fs::read(path).await.map_err(syndro_store::FileStoreError::from)?;
    state
        .http
        .post(&url)
        .header("x-transfer-id", transfer_id)
        .header("x-sender-id", state.config.self_id.to_string())
        .header("x-file-name", &item.name)
        .header("x-file-size", item.size.to_string())
        .body(body)
        .send()
        .await
        .map_err(map_reqwest_err)?;
    Ok(())
}

/// Streams `path` through AES-GCM framed records (spec §4.6.5), one chunk
/// at a time, computing the plaintext hash as it goes.
async fn upload_encrypted(
    state: &Arc<EngineState>,
    req: &OutboundRequest,
    transfer_id: &str,
    item: &TransferItem,
    path: &Path,
    channel: Arc<syndro_crypto::Channel>,
) -> Result<(), TransferError> {
    let file_hash = syndro_crypto::hash_file(path).await?;
    let chunk_size: usize = 256 * 1024;
    let chunks = syndro_store::streaming_reader(path, chunk_size).await?;
    let framed = channel.encrypt_stream(chunks);

    futures_util::pin_mut!(framed);
    let mut body = Vec::new();
    while let Some(frame) = futures_util::StreamExt::next(&mut framed).await {
        let frame = frame?;
        body.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        body.extend_from_slice(&frame);
    }

    let url = format!("{}/transfer/upload-encrypted", base_url(req.receiver_ip, req.receiver_port));
    let resp = state
        .http
        .post(&url)
        .header("x-transfer-id", transfer_id)
        .header("x-sender-id", state.config.self_id.to_string())
        .header("x-file-name", &item.name)
        .header("x-original-size", item.size.to_string())
        .header("x-file-hash", &file_hash)
        .body(body)
        .send()
        .await
        .map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        return Err(TransferError::Network(format!("upload rejected: {}", resp.status())));
    }
    info!("uploaded {} encrypted ({} bytes)", item.name, item.size);
    Ok(())
}
