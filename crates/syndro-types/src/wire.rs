//! Wire DTOs for the HTTP endpoints and the UDP beacon, matching the JSON
//! shapes exactly (field names, optionality) so independently-built peers
//! interoperate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UDP broadcast beacon payload. The `syndro` field is always `true` and is
/// the cheapest way to reject foreign broadcast traffic on the same port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beacon {
    pub syndro: bool,
    pub id: Uuid,
    pub name: String,
    pub os: String,
    pub port: u16,
    pub timestamp: i64,
}

impl Beacon {
    pub fn new(id: Uuid, name: String, os: String, port: u16, timestamp: i64) -> Self {
        Self { syndro: true, id, name, os, port, timestamp }
    }
}

/// `GET /syndro.json` response — also the probe-scan admission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndroInfo {
    pub id: Uuid,
    pub name: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub port: u16,
    pub version: String,
    pub encryption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeRequest {
    pub device_id: Uuid,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    pub device_id: Uuid,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub id: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_token: String,
    pub receiver_id: Uuid,
    pub items: Vec<crate::model::TransferItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InitiateResponse {
    Accepted {
        transfer_id: String,
        authorized: bool,
        encryption: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<Vec<u8>>,
    },
    PendingApproval {
        request_id: String,
    },
}

/// `GET /transfer/approval/{requestId}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ApprovalResponse {
    Pending,
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<Vec<u8>>,
    },
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelInitiateRequest {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ParallelInitiateResponse {
    PendingApproval { request_id: String },
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelCompleteRequest {
    pub transfer_id: String,
    pub file_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelCompleteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: String,
    pub status: crate::model::TransferStatus,
    pub progress: crate::model::Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Generic JSON error body the server returns alongside non-2xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: crate::error::ErrorCode,
    pub message: String,
}
