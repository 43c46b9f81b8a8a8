//! The scheduler: decides which connectors are due, runs each sync as a
//! cancellable producer/consumer pair, and reconciles durable state.
//!
//! Per connector the state machine is: unsynced → due (stale and unlocked) →
//! locked/syncing → synced. A connector with `auth_valid = false` is skipped
//! entirely until re-authorized. The store's lock guarantees at most one
//! in-flight sync per connector id; the lock is acquired and released within
//! a single connector's processing, on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connector::{Connector, ConnectorRegistry};
use crate::embedding::Embedder;
use crate::error::SyncError;
use crate::models::ConnectorState;
use crate::pipeline::ChunkPipeline;
use crate::store::VectorStore;

/// Bounded rendezvous between producer and pipeline.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

pub struct Syncer {
    registry: ConnectorRegistry,
    store: Arc<dyn VectorStore>,
    pipeline: Arc<ChunkPipeline>,
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    check_period: std::time::Duration,
    stale_threshold: chrono::Duration,
}

impl Syncer {
    pub fn new(config: &Config, store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            registry: ConnectorRegistry::new(config.clone(), store.clone()),
            pipeline: Arc::new(ChunkPipeline::new(embedder, store.clone())),
            store,
            connectors: RwLock::new(HashMap::new()),
            check_period: config.syncer.check_period(),
            stale_threshold: chrono::Duration::from_std(config.syncer.stale_threshold())
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Restore known connectors from the store and re-initialize them.
    ///
    /// Idempotent: once connectors are registered, later calls do nothing.
    pub async fn init(&self) -> Result<(), SyncError> {
        {
            let connectors = self.connectors.read().unwrap();
            if !connectors.is_empty() {
                debug!(
                    "Syncer init called with {} connectors, skipping state restoration",
                    connectors.len()
                );
                return Ok(());
            }
        }

        let states = self.store.all_connector_states().await?;
        for state in states {
            let connector = self
                .registry
                .build(state.connector_type, &state.connector_id)?;
            connector.init().await?;
            self.add_connector(connector);
        }
        Ok(())
    }

    /// Build and register connectors declared in the config that have no
    /// durable state yet. Used on first run.
    pub async fn register_configured(&self) -> Result<(), SyncError> {
        for connector_type in self.registry.configured_types() {
            let connector_id = connector_type.as_str();
            if self.get_connector(connector_id).is_some() {
                continue;
            }
            let connector = self.registry.build(connector_type, connector_id)?;
            connector.init().await?;
            self.add_connector(connector);
        }
        Ok(())
    }

    /// Register a connector by id; no-op when already present.
    pub fn add_connector(&self, connector: Arc<dyn Connector>) {
        let mut connectors = self.connectors.write().unwrap();
        connectors
            .entry(connector.id().to_string())
            .or_insert(connector);
    }

    pub fn get_connector(&self, connector_id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.read().unwrap().get(connector_id).cloned()
    }

    /// Current state of every registered connector.
    pub async fn connector_states(&self) -> Result<Vec<ConnectorState>, SyncError> {
        let connectors = self.sorted_connectors();
        let mut states = Vec::with_capacity(connectors.len());
        for connector in connectors {
            states.push(connector.status().await?);
        }
        Ok(states)
    }

    fn sorted_connectors(&self) -> Vec<Arc<dyn Connector>> {
        let connectors = self.connectors.read().unwrap();
        let mut all: Vec<Arc<dyn Connector>> = connectors.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Scheduler loop: a sync pass every check period until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; consume that so the first pass waits a
        // full period, matching a fresh boot where init just synced nothing.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Syncer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sync_now(&cancel).await {
                        if err.is_cancelled() {
                            info!("Syncer stopped mid-pass");
                            return;
                        }
                        warn!("Failed to sync: {}", err);
                    }
                }
            }
        }
    }

    /// One full pass over all registered connectors.
    ///
    /// Connector-level failures are logged and do not stop the pass; only
    /// infrastructure errors and cancellation abort it.
    pub async fn sync_now(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        for connector in self.sorted_connectors() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.sync_connector(connector, cancel).await?;
        }
        Ok(())
    }

    /// Non-blocking variant of [`sync_now`](Syncer::sync_now); failures are
    /// logged in the background task.
    pub fn sync_now_background(self: &Arc<Self>, cancel: CancellationToken) {
        let syncer = self.clone();
        tokio::spawn(async move {
            if let Err(err) = syncer.sync_now(&cancel).await {
                warn!("Background sync pass failed: {}", err);
            }
        });
    }

    async fn sync_connector(
        &self,
        connector: Arc<dyn Connector>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let connector_id = connector.id().to_string();
        debug!("Checking status for connector {}", connector_id);
        let state = connector.status().await?;

        if !state.auth_valid {
            debug!("Auth required for {}, skipping", connector_id);
            return Ok(());
        }
        if state.syncing {
            debug!("Sync already in progress for {}, skipping", connector_id);
            return Ok(());
        }
        let due = match state.last_sync {
            None => true,
            Some(last_sync) => Utc::now() - last_sync > self.stale_threshold,
        };
        if !due {
            return Ok(());
        }

        info!("Sync required for {}", connector_id);
        match self.store.lock_connector(&connector_id).await {
            Ok(()) => {}
            Err(SyncError::AlreadyLocked(_)) => {
                // Another pass won the race; same outcome as syncing=true.
                debug!("Connector {} already locked, skipping", connector_id);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        // Captured before the sync starts so items changing during it are
        // picked up again on the next pass.
        let new_sync_time = Utc::now();

        let outcome = self
            .run_locked(connector.clone(), state.last_sync, cancel)
            .await;

        // Reconcile while the lock is still held: once it is released a
        // rival pass may own the flag, and a late state write would clobber
        // it. The unlock below is this connector's final store operation.
        let reconciled = match outcome {
            Ok(succeeded) => match connector.status().await {
                Ok(mut state) => {
                    if succeeded {
                        state.last_sync = Some(new_sync_time);
                    }
                    connector.update_state(&state).await.map(|_| state)
                }
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = self.store.unlock_connector(&connector_id).await {
            warn!("Failed to unlock connector {}: {}", connector_id, err);
        }

        let state = reconciled?;
        info!(
            "Sync for connector {} complete: {} documents, {} chunks",
            connector_id, state.num_documents, state.num_chunks
        );
        Ok(())
    }

    /// Run the producer (connector sync) and consumer (chunk pipeline)
    /// concurrently under the held lock, racing cancellation, producer
    /// error, and pipeline completion.
    ///
    /// Returns whether the sync succeeded; `Err` is reserved for
    /// cancellation.
    async fn run_locked(
        &self,
        connector: Arc<dyn Connector>,
        since: Option<chrono::DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<bool, SyncError> {
        let connector_id = connector.id().to_string();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        let mut producer = {
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { connector.sync(cancel, since, chunk_tx).await })
        };
        let mut consumer = {
            let pipeline = self.pipeline.clone();
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(connector, cancel, chunk_rx).await })
        };

        let produced = tokio::select! {
            _ = cancel.cancelled() => {
                // Both tasks observe the token and wind down on their own.
                return Err(SyncError::Cancelled);
            }
            produced = &mut producer => produced,
        };

        let succeeded = match produced {
            Ok(Ok(())) => true,
            Ok(Err(SyncError::Cancelled)) => return Err(SyncError::Cancelled),
            Ok(Err(err)) => {
                warn!("Error during sync for {}: {}", connector_id, err);
                false
            }
            Err(join_err) => {
                warn!("Sync task for {} panicked: {}", connector_id, join_err);
                false
            }
        };

        // The chunk sender is gone; let the pipeline drain what was emitted.
        let stats = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            consumed = &mut consumer => consumed.unwrap_or_default(),
        };

        debug!(
            "Pipeline for {} done: {} received, {} persisted, {} skipped, {} failed",
            connector_id,
            stats.chunks_received,
            stats.chunks_persisted,
            stats.chunks_skipped,
            stats.chunks_failed
        );
        Ok(succeeded)
    }
}
