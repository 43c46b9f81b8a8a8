//! Vector store boundary and the connector locking protocol.
//!
//! The [`VectorStore`] trait covers everything the sync engine needs from the
//! index: batch vector writes, chunk deletion by document, and the durable
//! [`ConnectorState`] records with their lock operations.
//!
//! The locking discipline is the load-bearing part: [`lock_connector`]
//! (`VectorStore::lock_connector`) must be an atomic check-and-set that fails
//! with [`SyncError::AlreadyLocked`] when the flag is already held, so that
//! no two scheduler ticks can start overlapping syncs for one connector.

pub mod memory;
pub mod weaviate;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, StoreConfig};
use crate::error::SyncError;
use crate::models::{AddVectorItem, ConnectorState};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist a batch of (chunk, vector) pairs.
    async fn add_vectors(&self, items: Vec<AddVectorItem>) -> Result<(), SyncError>;

    /// Delete all chunks previously stored for a document. Best-effort for
    /// callers: failures are logged, a resync simply leaves stale chunks.
    async fn delete_document_chunks(
        &self,
        document_id: &str,
        connector_id: &str,
    ) -> Result<(), SyncError>;

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>, SyncError>;

    async fn get_connector_state(&self, connector_id: &str)
        -> Result<ConnectorState, SyncError>;

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<(), SyncError>;

    /// Atomically set `syncing = true` for the connector, failing with
    /// [`SyncError::AlreadyLocked`] if it already is.
    async fn lock_connector(&self, connector_id: &str) -> Result<(), SyncError>;

    /// Clear `syncing`. Idempotent.
    async fn unlock_connector(&self, connector_id: &str) -> Result<(), SyncError>;
}

/// Build the configured store backend.
pub fn create_store(config: &Config) -> Result<std::sync::Arc<dyn VectorStore>> {
    let StoreConfig { backend, url } = &config.store;
    match backend.as_str() {
        "memory" => Ok(std::sync::Arc::new(memory::MemoryStore::new())),
        "weaviate" => {
            let url = url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.url required for weaviate backend"))?;
            Ok(std::sync::Arc::new(weaviate::WeaviateStore::new(url)?))
        }
        other => anyhow::bail!("Unknown store backend: {}", other),
    }
}
