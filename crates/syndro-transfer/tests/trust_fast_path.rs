//! Trusted-device fast path (spec §8): a pre-trusted, auto-accept receiver
//! answers `/transfer/initiate` with an immediate accept, no approval poll.

mod common;

use chrono::Utc;
use common::{spawn_node, TestNodeOpts};
use std::time::Duration;
use syndro_transfer::client::{send_transfer, OutboundRequest};
use syndro_types::model::{TransferItem, TransferStatus, TrustedDevice};

#[tokio::test]
async fn trusted_sender_skips_approval() {
    let receiver = spawn_node(TestNodeOpts { auto_accept_trusted: true, ..TestNodeOpts::default() }).await;
    let sender = spawn_node(TestNodeOpts::default()).await;

    receiver
        .state
        .trust
        .trust(TrustedDevice {
            sender_id: sender.state.config.self_id,
            sender_name: "test-node".into(),
            token: "tok".into(),
            trusted_at: Utc::now(),
        })
        .await
        .unwrap();

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("hi.txt");
    tokio::fs::write(&src_path, b"hi").await.unwrap();

    let receiver_port: u16 = receiver.base_url.rsplit(':').next().unwrap().parse().unwrap();
    let item = TransferItem {
        name: "hi.txt".into(),
        absolute_path: src_path.display().to_string(),
        size: 2,
        is_directory: false,
        parent_relative_path: None,
        created_at: None,
        modified_at: None,
    };
    let req = OutboundRequest {
        receiver_ip: "127.0.0.1".parse().unwrap(),
        receiver_port,
        receiver_id: receiver.state.config.self_id,
        items: vec![item],
        sender_token: "tok".into(),
    };

    // No approver task is spawned: a pending approval here would hang until
    // the 5-minute poll timeout, which is the behavior under test.
    tokio::time::timeout(Duration::from_secs(5), send_transfer(sender.state.clone(), req))
        .await
        .expect("fast path should not need approval polling")
        .expect("transfer failed");

    let written = tokio::fs::read(receiver.download_root.join("hi.txt")).await.unwrap();
    assert_eq!(written, b"hi");

    let transfer_id = syndro_crypto::transfer_id(&syndro_types::model::transfer_id_manifest(
        sender.state.config.self_id,
        receiver.state.config.self_id,
        &[TransferItem {
            name: "hi.txt".into(),
            absolute_path: src_path.display().to_string(),
            size: 2,
            is_directory: false,
            parent_relative_path: None,
            created_at: None,
            modified_at: None,
        }],
    ));
    let transfer = receiver.state.get_transfer(&transfer_id).await.expect("transfer not registered");
    assert_eq!(transfer.status, TransferStatus::Completed);
}
