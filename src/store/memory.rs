//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! State and vectors live in `HashMap`s behind `std::sync::Mutex`. The lock
//! check-and-set happens under the state mutex, which makes it atomic with
//! respect to concurrent scheduler passes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::models::{AddVectorItem, ConnectorState};

use super::VectorStore;

pub struct MemoryStore {
    states: Mutex<HashMap<String, ConnectorState>>,
    vectors: Mutex<Vec<AddVectorItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            vectors: Mutex::new(Vec::new()),
        }
    }

    /// Number of stored vectors; used by tests and the status command.
    pub fn vector_count(&self) -> usize {
        self.vectors.lock().unwrap().len()
    }

    /// Stored chunk hashes for a connector, in insertion order.
    pub fn chunk_hashes(&self, connector_id: &str) -> Vec<String> {
        self.vectors
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.chunk.connector_id == connector_id)
            .map(|item| item.chunk.hash.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn add_vectors(&self, items: Vec<AddVectorItem>) -> Result<(), SyncError> {
        self.vectors.lock().unwrap().extend(items);
        Ok(())
    }

    async fn delete_document_chunks(
        &self,
        document_id: &str,
        connector_id: &str,
    ) -> Result<(), SyncError> {
        self.vectors.lock().unwrap().retain(|item| {
            !(item.chunk.document_id == document_id && item.chunk.connector_id == connector_id)
        });
        Ok(())
    }

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>, SyncError> {
        let states = self.states.lock().unwrap();
        let mut all: Vec<ConnectorState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
        Ok(all)
    }

    async fn get_connector_state(
        &self,
        connector_id: &str,
    ) -> Result<ConnectorState, SyncError> {
        self.states
            .lock()
            .unwrap()
            .get(connector_id)
            .cloned()
            .ok_or_else(|| SyncError::store(format!("no state for connector {}", connector_id)))
    }

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<(), SyncError> {
        self.states
            .lock()
            .unwrap()
            .insert(state.connector_id.clone(), state.clone());
        Ok(())
    }

    async fn lock_connector(&self, connector_id: &str) -> Result<(), SyncError> {
        let mut states = self.states.lock().unwrap();
        let state = states
            .get_mut(connector_id)
            .ok_or_else(|| SyncError::store(format!("no state for connector {}", connector_id)))?;
        if state.syncing {
            return Err(SyncError::AlreadyLocked(connector_id.to_string()));
        }
        state.syncing = true;
        Ok(())
    }

    async fn unlock_connector(&self, connector_id: &str) -> Result<(), SyncError> {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(connector_id) {
            state.syncing = false;
        }
        Ok(())
    }
}
