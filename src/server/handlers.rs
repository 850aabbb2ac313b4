use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::gateway::Gateway;
use super::protocol::{
    EntriesResponse, EntryJson, HandleResponse, PutFieldRequest, SizeResponse, StatusResponse,
    ValueResponse, WriteResponse,
};
use crate::error::MapError;
use crate::fields::Value;
use crate::map::RedisMap;

fn status_for(error: &MapError) -> StatusCode {
    match error {
        MapError::Validation(_) | MapError::NullArgument(_) => StatusCode::BAD_REQUEST,
        MapError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        MapError::Exhausted | MapError::InvalidIteratorState | MapError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Resolves the handle for `raw_key`, or the status and message to reply with.
fn lookup(gateway: &Gateway, raw_key: &str) -> Result<Arc<RedisMap>, (StatusCode, String)> {
    let key = gateway
        .canonical_key(raw_key)
        .map_err(|e| (status_for(&e), e.to_string()))?;
    gateway
        .handle(&key)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no open handle on {}", key)))
}

pub async fn handle_create(
    Extension(gateway): Extension<Arc<Gateway>>,
) -> (StatusCode, Json<HandleResponse>) {
    match gateway.client().create().await {
        Ok(map) => {
            let map = gateway.adopt(map);
            (
                StatusCode::CREATED,
                Json(HandleResponse {
                    key: Some(map.key().to_string()),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to create map: {}", e);
            (
                status_for(&e),
                Json(HandleResponse {
                    key: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_attach(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(raw_key): Path<String>,
) -> (StatusCode, Json<HandleResponse>) {
    if let Ok(map) = lookup(&gateway, &raw_key) {
        return (
            StatusCode::OK,
            Json(HandleResponse {
                key: Some(map.key().to_string()),
                error: None,
            }),
        );
    }

    match gateway.client().attach_by_key(&raw_key).await {
        Ok(map) => {
            let map = gateway.adopt(map);
            (
                StatusCode::OK,
                Json(HandleResponse {
                    key: Some(map.key().to_string()),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::warn!("Failed to attach to {}: {}", raw_key, e);
            (
                status_for(&e),
                Json(HandleResponse {
                    key: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_release(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(raw_key): Path<String>,
) -> (StatusCode, Json<StatusResponse>) {
    let key = match gateway.canonical_key(&raw_key) {
        Ok(key) => key,
        Err(e) => {
            return (
                status_for(&e),
                Json(StatusResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    };

    if gateway.release(&key) {
        tracing::info!("Released handle on {}", key);
        (
            StatusCode::OK,
            Json(StatusResponse {
                success: true,
                error: None,
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(StatusResponse {
                success: false,
                error: Some(format!("no open handle on {}", key)),
            }),
        )
    }
}

pub async fn handle_size(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(raw_key): Path<String>,
) -> (StatusCode, Json<SizeResponse>) {
    let map = match lookup(&gateway, &raw_key) {
        Ok(map) => map,
        Err((status, error)) => {
            return (
                status,
                Json(SizeResponse {
                    size: 0,
                    error: Some(error),
                }),
            )
        }
    };

    match map.size().await {
        Ok(size) => (StatusCode::OK, Json(SizeResponse { size, error: None })),
        Err(e) => (
            status_for(&e),
            Json(SizeResponse {
                size: 0,
                error: Some(e.to_string()),
            }),
        ),
    }
}

pub async fn handle_get_field(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path((raw_key, field)): Path<(String, String)>,
) -> (StatusCode, Json<ValueResponse>) {
    let map = match lookup(&gateway, &raw_key) {
        Ok(map) => map,
        Err((status, error)) => {
            return (
                status,
                Json(ValueResponse {
                    found: false,
                    value: None,
                    error: Some(error),
                }),
            )
        }
    };

    match map.lookup(Some(&field)).await {
        Ok(Some(value)) => (
            StatusCode::OK,
            Json(ValueResponse {
                found: true,
                value,
                error: None,
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ValueResponse {
                found: false,
                value: None,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(ValueResponse {
                found: false,
                value: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

fn write_reply(result: crate::error::Result<Option<Value>>) -> (StatusCode, Json<WriteResponse>) {
    match result {
        Ok(previous) => (
            StatusCode::OK,
            Json(WriteResponse {
                existed: previous.is_some(),
                previous: previous.flatten(),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Field write failed: {}", e);
            (
                status_for(&e),
                Json(WriteResponse {
                    existed: false,
                    previous: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_put_field(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path((raw_key, field)): Path<(String, String)>,
    Json(req): Json<PutFieldRequest>,
) -> (StatusCode, Json<WriteResponse>) {
    match lookup(&gateway, &raw_key) {
        Ok(map) => write_reply(map.put(Some(&field), req.value.as_deref()).await),
        Err((status, error)) => (
            status,
            Json(WriteResponse {
                existed: false,
                previous: None,
                error: Some(error),
            }),
        ),
    }
}

pub async fn handle_delete_field(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path((raw_key, field)): Path<(String, String)>,
) -> (StatusCode, Json<WriteResponse>) {
    match lookup(&gateway, &raw_key) {
        Ok(map) => write_reply(map.remove(Some(&field)).await),
        Err((status, error)) => (
            status,
            Json(WriteResponse {
                existed: false,
                previous: None,
                error: Some(error),
            }),
        ),
    }
}

pub async fn handle_entries(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(raw_key): Path<String>,
) -> (StatusCode, Json<EntriesResponse>) {
    let map = match lookup(&gateway, &raw_key) {
        Ok(map) => map,
        Err((status, error)) => {
            return (
                status,
                Json(EntriesResponse {
                    entries: Vec::new(),
                    error: Some(error),
                }),
            )
        }
    };

    match map.entries().collect_remaining().await {
        Ok(entries) => (
            StatusCode::OK,
            Json(EntriesResponse {
                entries: entries
                    .into_iter()
                    .map(|(key, value)| EntryJson { key, value })
                    .collect(),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(EntriesResponse {
                entries: Vec::new(),
                error: Some(e.to_string()),
            }),
        ),
    }
}

pub async fn handle_clear(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(raw_key): Path<String>,
) -> (StatusCode, Json<StatusResponse>) {
    let map = match lookup(&gateway, &raw_key) {
        Ok(map) => map,
        Err((status, error)) => {
            return (
                status,
                Json(StatusResponse {
                    success: false,
                    error: Some(error),
                }),
            )
        }
    };

    match map.clear().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(StatusResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}
