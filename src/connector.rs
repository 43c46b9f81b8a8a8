//! The connector capability contract and the closed connector registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connector_drive::DriveConnector;
use crate::credentials::FileCredentialStore;
use crate::error::SyncError;
use crate::models::{Chunk, ConnectorState, ConnectorType};
use crate::store::VectorStore;

/// A data source adapter that authenticates, enumerates changed items, and
/// emits chunks.
///
/// # Lifecycle
///
/// 1. Built by the [`ConnectorRegistry`] at startup or when restoring state.
/// 2. [`init`](Connector::init) re-establishes runtime handles; safe to call
///    repeatedly.
/// 3. [`sync`](Connector::sync) is the producer half of a sync: it sends
///    chunks for every item modified after `since` (full scan when `None`)
///    and returns `Err` only for systemic failures. Individual item failures
///    are logged and skipped. The chunk channel closes when the sender is
///    dropped, on every exit path; nothing is sent after cancellation.
#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;

    fn connector_type(&self) -> ConnectorType;

    fn display_name(&self) -> &str;

    /// Idempotent. Discovers existing credentials and ensures a durable
    /// [`ConnectorState`] exists for this connector.
    async fn init(&self) -> Result<(), SyncError>;

    /// No-op when a valid credential already exists; otherwise starts the
    /// out-of-band authorization flow and returns immediately.
    async fn auth_setup(&self) -> Result<(), SyncError>;

    /// Exchange an authorization code for a durable credential, resolve the
    /// authenticated identity, and mark the state auth-valid.
    async fn auth_callback(&self, code: &str) -> Result<(), SyncError>;

    /// Current durable state, reflecting concurrent writers.
    async fn status(&self) -> Result<ConnectorState, SyncError>;

    async fn update_state(&self, state: &ConnectorState) -> Result<(), SyncError>;

    /// Producer operation: enumerate items modified after `since` and emit
    /// their chunks.
    async fn sync(
        &self,
        cancel: CancellationToken,
        since: Option<DateTime<Utc>>,
        chunks: mpsc::Sender<Chunk>,
    ) -> Result<(), SyncError>;
}

/// Closed factory for connector instances, keyed by [`ConnectorType`].
///
/// Built once at startup from the config; never mutated afterwards. Types
/// without a compiled implementation fail with a config error.
pub struct ConnectorRegistry {
    config: Config,
    store: Arc<dyn VectorStore>,
}

impl ConnectorRegistry {
    pub fn new(config: Config, store: Arc<dyn VectorStore>) -> Self {
        Self { config, store }
    }

    /// Connector types that have configuration present.
    pub fn configured_types(&self) -> Vec<ConnectorType> {
        let mut types = Vec::new();
        if self.config.connectors.googledrive.is_some() {
            types.push(ConnectorType::GoogleDrive);
        }
        types
    }

    /// Build a connector instance for a type and id.
    pub fn build(
        &self,
        connector_type: ConnectorType,
        connector_id: &str,
    ) -> Result<Arc<dyn Connector>, SyncError> {
        match connector_type {
            ConnectorType::GoogleDrive => {
                let drive_config = self.config.connectors.googledrive.as_ref().ok_or_else(|| {
                    SyncError::Config("googledrive connector is not configured".into())
                })?;
                let credentials =
                    Arc::new(FileCredentialStore::new(self.config.credentials.dir.clone()));
                Ok(Arc::new(DriveConnector::new(
                    connector_id,
                    drive_config,
                    credentials,
                    self.store.clone(),
                )?))
            }
            other => Err(SyncError::Config(format!(
                "connector type {} has no implementation",
                other
            ))),
        }
    }
}
