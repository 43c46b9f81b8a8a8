//! Chunk pipeline: the consumer half of a sync.
//!
//! Drains the chunk channel produced by a connector's `sync`, cleaning,
//! filtering, embedding, and persisting each chunk, then bumping the
//! connector's counters. Individual chunk failures (embedding, store writes)
//! are logged and skipped; every remaining chunk is still attempted. The
//! pipeline terminates when the channel closes or the cancellation token
//! fires.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connector::Connector;
use crate::embedding::Embedder;
use crate::models::{AddVectorItem, Chunk};
use crate::store::VectorStore;
use crate::text::{clean_whitespace, MIN_CHUNK_CHARS};

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub chunks_received: u64,
    pub chunks_persisted: u64,
    pub chunks_skipped: u64,
    pub chunks_failed: u64,
    pub documents_seen: u64,
}

pub struct ChunkPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl ChunkPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Consume chunks until the channel closes or `cancel` fires.
    ///
    /// The returned stats resolving is the completion signal the scheduler
    /// races against cancellation and the producer's error.
    pub async fn run(
        &self,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
        mut chunks: mpsc::Receiver<Chunk>,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();
        let mut seen_documents: HashSet<String> = HashSet::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                received = chunks.recv() => match received {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            stats.chunks_received += 1;

            let cleaned = clean_whitespace(&chunk.text);
            if cleaned.chars().count() < MIN_CHUNK_CHARS {
                debug!("Skipping short chunk from {}", chunk.source_url);
                stats.chunks_skipped += 1;
                continue;
            }

            let vector = match self.embedder.embed(&cancel, &cleaned).await {
                Ok(vector) => vector,
                Err(err) => {
                    warn!("Failed to embed chunk from {}: {}", chunk.source_url, err);
                    stats.chunks_failed += 1;
                    continue;
                }
            };

            let mut chunk = chunk;
            chunk.text = cleaned;
            let document_id = chunk.document_id.clone();

            if let Err(err) = self.store.add_vectors(vec![AddVectorItem { chunk, vector }]).await
            {
                warn!("Failed to add vectors: {}", err);
                stats.chunks_failed += 1;
                continue;
            }
            stats.chunks_persisted += 1;
            let first_of_document = seen_documents.insert(document_id);
            if first_of_document {
                stats.documents_seen += 1;
            }

            // Counters are persisted as we go so a status poll during a long
            // sync reflects progress.
            match connector.status().await {
                Ok(mut state) => {
                    state.num_chunks += 1;
                    if first_of_document {
                        state.num_documents += 1;
                    }
                    if let Err(err) = connector.update_state(&state).await {
                        warn!("Failed to update connector state: {}", err);
                    }
                }
                Err(err) => {
                    warn!("Failed to get connector status: {}", err);
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::{ConnectorState, ConnectorType};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Embedder that counts calls and optionally fails on given texts.
    struct CountingEmbedder {
        calls: AtomicU32,
        fail_on: Vec<String>,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_on: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn embed(
            &self,
            _cancel: &CancellationToken,
            text: &str,
        ) -> Result<Vec<f32>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.iter().any(|t| t == text) {
                return Err(SyncError::Embedding("scripted failure".into()));
            }
            Ok(vec![text.len() as f32; 4])
        }
    }

    /// Connector stub that only serves state reads and writes.
    struct StateOnlyConnector {
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl Connector for StateOnlyConnector {
        fn id(&self) -> &str {
            "gd-1"
        }
        fn connector_type(&self) -> ConnectorType {
            ConnectorType::GoogleDrive
        }
        fn display_name(&self) -> &str {
            "Drive"
        }
        async fn init(&self) -> Result<(), SyncError> {
            Ok(())
        }
        async fn auth_setup(&self) -> Result<(), SyncError> {
            Ok(())
        }
        async fn auth_callback(&self, _code: &str) -> Result<(), SyncError> {
            Ok(())
        }
        async fn status(&self) -> Result<ConnectorState, SyncError> {
            self.store.get_connector_state("gd-1").await
        }
        async fn update_state(&self, state: &ConnectorState) -> Result<(), SyncError> {
            self.store.update_connector_state(state).await
        }
        async fn sync(
            &self,
            _cancel: CancellationToken,
            _since: Option<DateTime<Utc>>,
            _chunks: mpsc::Sender<Chunk>,
        ) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn chunk(document_id: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            name: "file.txt".to_string(),
            source_url: "https://example.com/file".to_string(),
            connector_id: "gd-1".to_string(),
            connector_type: ConnectorType::GoogleDrive,
            hash: format!("hash-{}-{}", document_id, text.len()),
            document_id: document_id.to_string(),
        }
    }

    async fn run_pipeline(
        embedder: Arc<CountingEmbedder>,
        store: Arc<MemoryStore>,
        chunks: Vec<Chunk>,
    ) -> PipelineStats {
        store
            .update_connector_state(&ConnectorState::new(
                "gd-1",
                ConnectorType::GoogleDrive,
                "Drive",
            ))
            .await
            .unwrap();

        let pipeline = ChunkPipeline::new(embedder, store.clone());
        let connector = Arc::new(StateOnlyConnector { store });
        let (tx, rx) = mpsc::channel(16);
        for c in chunks {
            tx.send(c).await.unwrap();
        }
        drop(tx);
        pipeline.run(connector, CancellationToken::new(), rx).await
    }

    #[tokio::test]
    async fn test_short_chunks_never_reach_embedder() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(MemoryStore::new());

        // Exactly the threshold is kept; one char shorter is dropped.
        let at_threshold = "a".repeat(MIN_CHUNK_CHARS);
        let below = "a".repeat(MIN_CHUNK_CHARS - 1);
        let stats = run_pipeline(
            embedder.clone(),
            store.clone(),
            vec![chunk("doc-1", &at_threshold), chunk("doc-1", &below)],
        )
        .await;

        assert_eq!(stats.chunks_persisted, 1);
        assert_eq!(stats.chunks_skipped, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.vector_count(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_cleaned_before_threshold() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(MemoryStore::new());

        // Long before cleaning, short after.
        let padded = format!("   a{}b   ", " ".repeat(40));
        let stats = run_pipeline(embedder.clone(), store, vec![chunk("doc-1", &padded)]).await;

        assert_eq!(stats.chunks_skipped, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embed_failure_skips_chunk_not_stream() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_on: vec!["this chunk fails embedding".to_string()],
        });
        let store = Arc::new(MemoryStore::new());

        let stats = run_pipeline(
            embedder,
            store.clone(),
            vec![
                chunk("doc-1", "first healthy chunk"),
                chunk("doc-1", "this chunk fails embedding"),
                chunk("doc-2", "second healthy chunk"),
            ],
        )
        .await;

        assert_eq!(stats.chunks_persisted, 2);
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(stats.documents_seen, 2);

        let state = store.get_connector_state("gd-1").await.unwrap();
        assert_eq!(state.num_chunks, 2);
        assert_eq!(state.num_documents, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_consumption() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(MemoryStore::new());
        store
            .update_connector_state(&ConnectorState::new(
                "gd-1",
                ConnectorType::GoogleDrive,
                "Drive",
            ))
            .await
            .unwrap();

        let pipeline = ChunkPipeline::new(embedder, store.clone());
        let connector = Arc::new(StateOnlyConnector {
            store: store.clone(),
        });
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Sender kept open: only cancellation can end the loop.
        let stats = pipeline.run(connector, cancel, rx).await;
        drop(tx);

        assert_eq!(stats.chunks_received, 0);
        assert_eq!(store.vector_count(), 0);
    }
}
