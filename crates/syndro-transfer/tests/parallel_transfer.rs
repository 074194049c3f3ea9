//! Parallel transfer with a dropped chunk (spec §8 / §4.6.4): upload all but
//! one chunk, confirm `/transfer/parallel/complete` reports it missing, post
//! the missing chunk, then confirm completion and content integrity.

mod common;

use common::{spawn_node, TestNodeOpts};
use syndro_transfer::parallel::ParallelConfig;
use syndro_types::wire::{ParallelCompleteRequest, ParallelCompleteResponse, ParallelInitiateRequest, ParallelInitiateResponse};
use uuid::Uuid;

const TINY_PARALLEL: ParallelConfig = ParallelConfig { connections: 4, chunk_size: 16, min_parallel: 1 };

#[tokio::test]
async fn dropped_chunk_is_reported_missing_then_healed() {
    let receiver = spawn_node(TestNodeOpts {
        auto_accept_trusted: true,
        parallel: TINY_PARALLEL,
        ..TestNodeOpts::default()
    }).await;
    let sender_id = Uuid::new_v4();

    receiver
        .state
        .trust
        .trust(syndro_types::model::TrustedDevice {
            sender_id,
            sender_name: "sender".into(),
            token: "tok".into(),
            trusted_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let content: Vec<u8> = (0u8..80).collect();
    let transfer_id = "parallel-test-1".to_string();
    let client = reqwest::Client::new();

    let initiate: ParallelInitiateResponse = client
        .post(format!("{}/transfer/parallel/initiate", receiver.base_url))
        .json(&ParallelInitiateRequest {
            transfer_id: transfer_id.clone(),
            file_name: "big.bin".into(),
            file_size: content.len() as u64,
            sender_id,
            sender_name: "sender".into(),
            sender_token: "tok".into(),
        })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(matches!(initiate, ParallelInitiateResponse::Success));

    let chunk_size = TINY_PARALLEL.chunk_size as usize;
    let total_chunks = TINY_PARALLEL.total_chunks(content.len() as u64);
    let dropped_index = total_chunks / 2;

    for index in 0..total_chunks {
        if index == dropped_index {
            continue;
        }
        let start = index as usize * chunk_size;
        let end = (start + chunk_size).min(content.len());
        post_chunk(&client, &receiver.base_url, &transfer_id, index, &content[start..end]).await;
    }

    let incomplete: ParallelCompleteResponse = client
        .post(format!("{}/transfer/parallel/complete", receiver.base_url))
        .json(&ParallelCompleteRequest {
            transfer_id: transfer_id.clone(),
            file_hash: syndro_crypto::hash_string("irrelevant-until-complete"),
        })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!incomplete.success);
    assert_eq!(incomplete.missing, vec![dropped_index]);

    let start = dropped_index as usize * chunk_size;
    let end = (start + chunk_size).min(content.len());
    post_chunk(&client, &receiver.base_url, &transfer_id, dropped_index, &content[start..end]).await;

    let tmp = tempfile::NamedTempFile::new().unwrap();
    tokio::fs::write(tmp.path(), &content).await.unwrap();
    let real_hash = syndro_crypto::hash_file(tmp.path()).await.unwrap();

    let complete: ParallelCompleteResponse = client
        .post(format!("{}/transfer/parallel/complete", receiver.base_url))
        .json(&ParallelCompleteRequest { transfer_id: transfer_id.clone(), file_hash: real_hash })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(complete.success, "missing: {:?}", complete.missing);
    assert_eq!(complete.file_size, Some(content.len() as u64));

    let written = tokio::fs::read(receiver.download_root.join("big.bin")).await.unwrap();
    assert_eq!(written, content);
}

async fn post_chunk(client: &reqwest::Client, base_url: &str, transfer_id: &str, index: u32, data: &[u8]) {
    let resp = client
        .post(format!("{base_url}/transfer/chunk"))
        .header("x-transfer-id", transfer_id)
        .header("x-chunk-index", index.to_string())
        .header("x-encrypted", "false")
        .body(data.to_vec())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "chunk {index} rejected: {}", resp.status());
}
