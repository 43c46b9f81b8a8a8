//! Core data models used throughout Syncdex.
//!
//! These types represent the connector state records, documents, and chunks
//! that flow through the sync and embedding pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of connector variants.
///
/// Built at startup by the [`ConnectorRegistry`](crate::connector::ConnectorRegistry);
/// new variants are added here, never registered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorType {
    GoogleDrive,
    Gmail,
    Outlook,
    Slack,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::GoogleDrive => "google-drive",
            ConnectorType::Gmail => "gmail",
            ConnectorType::Outlook => "outlook",
            ConnectorType::Slack => "slack",
        }
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google-drive" => Ok(ConnectorType::GoogleDrive),
            "gmail" => Ok(ConnectorType::Gmail),
            "outlook" => Ok(ConnectorType::Outlook),
            "slack" => Ok(ConnectorType::Slack),
            other => Err(format!("unknown connector type: {}", other)),
        }
    }
}

/// Durable per-connector sync record.
///
/// `syncing = true` implies the connector's lock is held. `last_sync` only
/// advances after a sync completes successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorState {
    pub connector_id: String,
    pub connector_type: ConnectorType,
    pub display_name: String,
    pub syncing: bool,
    pub auth_valid: bool,
    /// None until the first successful sync; enumeration does a full scan then.
    pub last_sync: Option<DateTime<Utc>>,
    pub num_documents: u64,
    pub num_chunks: u64,
    /// Authenticated identity (e.g. the account email), set by auth_callback.
    pub user: Option<String>,
}

impl ConnectorState {
    pub fn new(connector_id: &str, connector_type: ConnectorType, display_name: &str) -> Self {
        Self {
            connector_id: connector_id.to_string(),
            connector_type,
            display_name: display_name.to_string(),
            syncing: false,
            auth_valid: false,
            last_sync: None,
            num_documents: 0,
            num_chunks: 0,
            user: None,
        }
    }
}

/// One source item (file, email, message) as produced by a connector.
///
/// Resyncing the same `unique_id` supersedes the previous version: the old
/// chunks are deleted before new ones are emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub unique_id: String,
    pub name: String,
    pub source_url: String,
    pub connector_id: String,
    pub connector_type: ConnectorType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of embeddable text derived from a [`Document`].
///
/// The hash is content-derived and stable, used for dedup and citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub name: String,
    pub source_url: String,
    pub connector_id: String,
    pub connector_type: ConnectorType,
    pub hash: String,
    pub document_id: String,
}

/// The unit persisted to the vector store: a chunk plus its embedding.
#[derive(Debug, Clone)]
pub struct AddVectorItem {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_type_roundtrip() {
        for ty in [
            ConnectorType::GoogleDrive,
            ConnectorType::Gmail,
            ConnectorType::Outlook,
            ConnectorType::Slack,
        ] {
            let parsed: ConnectorType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
        assert!("dropbox".parse::<ConnectorType>().is_err());
    }

    #[test]
    fn test_new_state_defaults() {
        let state = ConnectorState::new("gd-1", ConnectorType::GoogleDrive, "Drive");
        assert!(!state.syncing);
        assert!(!state.auth_valid);
        assert!(state.last_sync.is_none());
        assert_eq!(state.num_chunks, 0);
    }
}
