//! Gateway Protocol
//!
//! Routes and the JSON bodies exchanged with gateway clients. Null keys and
//! values are carried as JSON `null`.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Creates a handle on a fresh key.
pub const ENDPOINT_MAPS: &str = "/maps";
/// Attaches to an existing (or absent) key.
pub const ENDPOINT_MAP: &str = "/maps/:key";
/// Releases the gateway's handle; renewal stops.
pub const ENDPOINT_HANDLE: &str = "/maps/:key/handle";
pub const ENDPOINT_SIZE: &str = "/maps/:key/size";
pub const ENDPOINT_FIELD: &str = "/maps/:key/fields/:field";
pub const ENDPOINT_ENTRIES: &str = "/maps/:key/entries";
pub const ENDPOINT_CLEAR: &str = "/maps/:key/clear";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleResponse {
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SizeResponse {
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a field read. `found` tells an absent field from a null value.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValueResponse {
    pub found: bool,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutFieldRequest {
    #[serde(default)]
    pub value: Option<String>,
}

/// Result of a field write or delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Whether the field existed before the operation.
    pub existed: bool,
    pub previous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryJson {
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntriesResponse {
    pub entries: Vec<EntryJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
