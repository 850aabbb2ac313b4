use super::handlers::*;
use super::protocol::*;
use crate::error::Result;
use crate::map::{MapClient, RedisMap};

use axum::extract::Extension;
use axum::routing::{delete, get, post};
use axum::Router;
use dashmap::DashMap;
use std::sync::Arc;

/// Shared state of the HTTP gateway: one client and the handles it holds open.
pub struct Gateway {
    client: MapClient,
    /// Open handles by canonical key; removing one stops its renewal.
    handles: DashMap<String, Arc<RedisMap>>,
}

impl Gateway {
    pub fn new(client: MapClient) -> Arc<Self> {
        Arc::new(Self {
            client,
            handles: DashMap::new(),
        })
    }

    pub fn client(&self) -> &MapClient {
        &self.client
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Canonical form of a caller-supplied key.
    pub fn canonical_key(&self, raw: &str) -> Result<String> {
        Ok(self.client.registry().parse_key(raw)?.to_string())
    }

    pub fn handle(&self, key: &str) -> Option<Arc<RedisMap>> {
        self.handles.get(key).map(|entry| entry.value().clone())
    }

    /// Keeps `map` open. If a handle on the same key is already held, that one
    /// wins and `map` is dropped.
    pub fn adopt(&self, map: RedisMap) -> Arc<RedisMap> {
        let key = map.key().to_string();
        self.handles
            .entry(key)
            .or_insert_with(|| Arc::new(map))
            .value()
            .clone()
    }

    pub fn release(&self, key: &str) -> bool {
        self.handles.remove(key).is_some()
    }
}

/// Builds the gateway's routes.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(ENDPOINT_MAPS, post(handle_create))
        .route(ENDPOINT_MAP, post(handle_attach))
        .route(ENDPOINT_HANDLE, delete(handle_release))
        .route(ENDPOINT_SIZE, get(handle_size))
        .route(
            ENDPOINT_FIELD,
            get(handle_get_field)
                .put(handle_put_field)
                .delete(handle_delete_field),
        )
        .route(ENDPOINT_ENTRIES, get(handle_entries))
        .route(ENDPOINT_CLEAR, post(handle_clear))
        .layer(Extension(gateway))
}
