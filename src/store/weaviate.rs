//! Weaviate REST backend for the [`VectorStore`](super::VectorStore) boundary.
//!
//! Chunks land in a `Chunk` class (one object per chunk, vector attached);
//! connector states live in a `ConnectorState` class with a deterministic
//! UUIDv5 object id per connector, so updates are plain PUTs.
//!
//! Lock atomicity: Weaviate offers no conditional write, so the
//! check-and-set in [`lock_connector`](super::VectorStore::lock_connector) is
//! serialized through an in-process mutex. The engine runs as a single
//! process; the mutex is the critical section.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{AddVectorItem, ConnectorState};

use super::VectorStore;

const CHUNK_CLASS: &str = "Chunk";
const STATE_CLASS: &str = "ConnectorState";

/// Namespace for deriving stable object ids from connector ids.
const STATE_NAMESPACE: Uuid = Uuid::from_u128(0x8f1d_6a0c_43a1_4b5e_9c7d_2f0b_5e88_91a4);

pub struct WeaviateStore {
    client: reqwest::Client,
    base_url: String,
    lock_gate: Mutex<()>,
}

impl WeaviateStore {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            lock_gate: Mutex::new(()),
        })
    }

    fn state_object_id(connector_id: &str) -> Uuid {
        Uuid::new_v5(&STATE_NAMESPACE, connector_id.as_bytes())
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::http(
            Some(status.as_u16()),
            format!("{}: {}", what, body),
        ))
    }

    async fn put_state(&self, state: &ConnectorState) -> Result<(), SyncError> {
        let object_id = Self::state_object_id(&state.connector_id);
        let body = json!({
            "class": STATE_CLASS,
            "id": object_id,
            "properties": serde_json::to_value(state)
                .map_err(|e| SyncError::store(e.to_string()))?,
        });

        let url = format!("{}/v1/objects/{}/{}", self.base_url, STATE_CLASS, object_id);
        let resp = self.client.put(&url).json(&body).send().await?;

        if resp.status().as_u16() == 404 {
            // First write for this connector: create instead.
            let resp = self
                .client
                .post(format!("{}/v1/objects", self.base_url))
                .json(&body)
                .send()
                .await?;
            Self::check(resp, "create connector state").await?;
            return Ok(());
        }

        Self::check(resp, "update connector state").await?;
        Ok(())
    }

    async fn fetch_states(&self) -> Result<Vec<ConnectorState>, SyncError> {
        let url = format!(
            "{}/v1/objects?class={}&limit=200",
            self.base_url, STATE_CLASS
        );
        let resp = self.client.get(&url).send().await?;
        let resp = Self::check(resp, "list connector states").await?;
        let body: serde_json::Value = resp.json().await?;

        let mut states = Vec::new();
        if let Some(objects) = body.get("objects").and_then(|o| o.as_array()) {
            for object in objects {
                let Some(properties) = object.get("properties") else {
                    continue;
                };
                match serde_json::from_value::<ConnectorState>(properties.clone()) {
                    Ok(state) => states.push(state),
                    Err(e) => {
                        debug!("Skipping malformed connector state object: {}", e);
                    }
                }
            }
        }
        states.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));
        Ok(states)
    }
}

#[async_trait]
impl VectorStore for WeaviateStore {
    async fn add_vectors(&self, items: Vec<AddVectorItem>) -> Result<(), SyncError> {
        if items.is_empty() {
            return Ok(());
        }

        let objects: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "class": CHUNK_CLASS,
                    "properties": {
                        "text": item.chunk.text,
                        "name": item.chunk.name,
                        "sourceUrl": item.chunk.source_url,
                        "connectorId": item.chunk.connector_id,
                        "connectorType": item.chunk.connector_type.as_str(),
                        "hash": item.chunk.hash,
                        "documentId": item.chunk.document_id,
                    },
                    "vector": item.vector,
                })
            })
            .collect();

        let resp = self
            .client
            .post(format!("{}/v1/batch/objects", self.base_url))
            .json(&json!({ "objects": objects }))
            .send()
            .await?;
        Self::check(resp, "batch add vectors").await?;
        debug!("Added {} vectors", items.len());
        Ok(())
    }

    async fn delete_document_chunks(
        &self,
        document_id: &str,
        connector_id: &str,
    ) -> Result<(), SyncError> {
        let body = json!({
            "match": {
                "class": CHUNK_CLASS,
                "where": {
                    "operator": "And",
                    "operands": [
                        {
                            "path": ["documentId"],
                            "operator": "Equal",
                            "valueText": document_id,
                        },
                        {
                            "path": ["connectorId"],
                            "operator": "Equal",
                            "valueText": connector_id,
                        }
                    ]
                }
            }
        });

        let resp = self
            .client
            .delete(format!("{}/v1/batch/objects", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::check(resp, "delete document chunks").await?;
        Ok(())
    }

    async fn all_connector_states(&self) -> Result<Vec<ConnectorState>, SyncError> {
        self.fetch_states().await
    }

    async fn get_connector_state(
        &self,
        connector_id: &str,
    ) -> Result<ConnectorState, SyncError> {
        self.fetch_states()
            .await?
            .into_iter()
            .find(|s| s.connector_id == connector_id)
            .ok_or_else(|| SyncError::store(format!("no state for connector {}", connector_id)))
    }

    async fn update_connector_state(&self, state: &ConnectorState) -> Result<(), SyncError> {
        self.put_state(state).await
    }

    async fn lock_connector(&self, connector_id: &str) -> Result<(), SyncError> {
        let _gate = self.lock_gate.lock().await;
        let mut state = self.get_connector_state(connector_id).await?;
        if state.syncing {
            return Err(SyncError::AlreadyLocked(connector_id.to_string()));
        }
        state.syncing = true;
        self.put_state(&state).await
    }

    async fn unlock_connector(&self, connector_id: &str) -> Result<(), SyncError> {
        let _gate = self.lock_gate.lock().await;
        let mut state = self.get_connector_state(connector_id).await?;
        if !state.syncing {
            return Ok(());
        }
        state.syncing = false;
        self.put_state(&state).await
    }
}
