//! A malicious `x-file-name` is sanitized to a plain basename rather than
//! allowed to escape the download root (spec §4.6.3, §9 threat model).

mod common;

use common::{spawn_node, TestNodeOpts};
use syndro_types::model::{TransferItem, TransferStatus};
use syndro_types::wire::{InitiateRequest, InitiateResponse};
use uuid::Uuid;

#[tokio::test]
async fn traversal_filename_is_sanitized_under_download_root() {
    let receiver = spawn_node(TestNodeOpts { auto_accept_trusted: true, ..TestNodeOpts::default() }).await;
    let sender_id = Uuid::new_v4();
    let client = reqwest::Client::new();

    receiver
        .state
        .trust
        .trust(syndro_types::model::TrustedDevice {
            sender_id,
            sender_name: "attacker".into(),
            token: "tok".into(),
            trusted_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let transfer_id = "traversal-test-1".to_string();
    let malicious_name = "../../../../etc/passwd";
    let item = TransferItem {
        name: malicious_name.into(),
        absolute_path: malicious_name.into(),
        size: 7,
        is_directory: false,
        parent_relative_path: None,
        created_at: None,
        modified_at: None,
    };

    let initiate: InitiateResponse = client
        .post(format!("{}/transfer/initiate", receiver.base_url))
        .json(&InitiateRequest {
            id: transfer_id.clone(),
            sender_id,
            sender_name: "attacker".into(),
            sender_token: "tok".into(),
            receiver_id: receiver.state.config.self_id,
            items: vec![item],
            public_key: None,
        })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(matches!(initiate, InitiateResponse::Accepted { authorized: true, .. }));

    let resp = client
        .post(format!("{}/transfer/upload", receiver.base_url))
        .header("x-transfer-id", &transfer_id)
        .header("x-sender-id", sender_id.to_string())
        .header("x-file-name", malicious_name)
        .header("x-file-size", "7")
        .body(b"payload".to_vec())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // Every "/" and ".." run is neutralized (syndro_store::sanitize_name),
    // so the file lands inside the download root under a flattened name
    // rather than escaping to a parent directory.
    let escaped = receiver.download_root.parent().unwrap().parent().unwrap().join("etc/passwd");
    assert!(!escaped.exists());

    let sanitized = syndro_store::sanitize_name(malicious_name).unwrap();
    assert!(syndro_store::is_within(&receiver.download_root, &receiver.download_root.join(&sanitized)));
    let contained = receiver.download_root.join(&sanitized);
    assert_eq!(tokio::fs::read(&contained).await.unwrap(), b"payload");

    let transfer = receiver.state.get_transfer(&transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
}
