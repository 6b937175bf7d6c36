// src/cloudllm/rag/sync.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::cloudllm::rag::document::{chunk_content, ChunkStrategy, Document, DocumentVersion, LoadResult, Loader};
use crate::cloudllm::rag::store::{KeywordIndex, VectorStore};
use crate::cloudllm::rag::RagError;

/// Turns a chunk of document content into an embedding vector. A
/// collaborator this crate does not ship a concrete implementation of, the
/// same way [`VectorStore`] and [`KeywordIndex`] are traits only.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Knobs controlling how `ingest`/`sync`/`refresh` behave, independent of
/// any single document.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Skip documents whose content is empty rather than indexing a
    /// zero-chunk no-op entry.
    pub skip_empty_documents: bool,
    /// Honor a document's own [`ChunkStrategy`] hint when present, falling
    /// back to `default_chunk_strategy` otherwise.
    pub use_hints: bool,
    pub default_chunk_strategy: ChunkStrategy,
    /// Stop and return the first per-document failure instead of
    /// accumulating it into statistics and continuing.
    pub fail_fast: bool,
    /// Record document versions in the registry so later `sync` calls can
    /// detect unchanged documents. Disabling this makes every `sync` behave
    /// like `refresh`.
    pub enable_versioning: bool,
    /// How many documents `ingest_async`/`sync_async`/`refresh_async`
    /// process per batch.
    pub batch_size: usize,
    /// How many chunks are embedded per [`Embedder::embed`] batch.
    pub embed_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            skip_empty_documents: true,
            use_hints: true,
            default_chunk_strategy: ChunkStrategy::default(),
            fail_fast: false,
            enable_versioning: true,
            batch_size: 16,
            embed_batch_size: 16,
        }
    }
}

/// Outcome counters for one `ingest`/`sync`/`refresh` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

struct RegistryEntry {
    version: DocumentVersion,
    chunk_ids: Vec<String>,
}

/// Keeps a [`VectorStore`] and [`KeywordIndex`] in sync with whatever a
/// [`Loader`] reports, using [`DocumentVersion::content_hash`] to skip
/// documents that haven't actually changed since the last sync.
pub struct SyncEngine {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    keyword_index: Arc<dyn KeywordIndex>,
    config: SyncConfig,
    registry: RwLock<HashMap<String, RegistryEntry>>,
}

impl SyncEngine {
    pub fn new(embedder: Arc<dyn Embedder>, vector_store: Arc<dyn VectorStore>, keyword_index: Arc<dyn KeywordIndex>) -> Self {
        Self::with_config(embedder, vector_store, keyword_index, SyncConfig::default())
    }

    pub fn with_config(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        keyword_index: Arc<dyn KeywordIndex>,
        config: SyncConfig,
    ) -> Self {
        SyncEngine { embedder, vector_store, keyword_index, config, registry: RwLock::new(HashMap::new()) }
    }

    /// True if `document` has no recorded version, or its content hash
    /// differs from what was indexed last time. Always true when
    /// versioning is disabled.
    pub fn needs_update(&self, document: &Document) -> bool {
        if !self.config.enable_versioning {
            return true;
        }
        let registry = self.registry.read().expect("lock poisoned");
        match registry.get(&document.id) {
            Some(entry) => entry.version.content_hash != document.version.content_hash,
            None => true,
        }
    }

    /// Indexes every document the loader reports, unconditionally. Does not
    /// consult or clear prior registry state for documents the loader
    /// doesn't report; use [`sync`](Self::sync) for a full reconciliation.
    pub async fn ingest(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        let results = loader.load().await?;
        let mut stats = SyncStats::default();
        for result in results {
            match result {
                LoadResult::Success(document) => {
                    if self.should_skip_empty(&document) {
                        continue;
                    }
                    match self.index_document(&document).await {
                        Ok(()) => stats.added += 1,
                        Err(e) if self.config.fail_fast => return Err(e),
                        Err(_) => continue,
                    }
                }
                LoadResult::Failure { error, .. } if self.config.fail_fast => {
                    return Err(RagError::LoaderError(error));
                }
                LoadResult::Failure { .. } | LoadResult::Skipped { .. } => {}
            }
        }
        Ok(stats)
    }

    /// Reconciles the index against the loader's current report: new
    /// documents are added, changed documents are re-chunked and
    /// re-embedded, unchanged documents are left alone, and any document
    /// the registry remembers but the loader no longer reports is deleted.
    pub async fn sync(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        let results = loader.load().await?;
        let mut stats = SyncStats::default();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for result in results {
            match result {
                LoadResult::Success(document) => {
                    if self.should_skip_empty(&document) {
                        continue;
                    }
                    seen_ids.insert(document.id.clone());
                    let existed = self.registry.read().expect("lock poisoned").contains_key(&document.id);
                    if !self.needs_update(&document) {
                        stats.unchanged += 1;
                        continue;
                    }
                    if existed {
                        // Hash differs: drop the prior chunk set before re-indexing so a
                        // document that shrinks doesn't leave orphaned chunks behind.
                        self.delete_document(&document.id).await?;
                    }
                    match self.index_document(&document).await {
                        Ok(()) => {
                            if existed {
                                stats.updated += 1;
                            } else {
                                stats.added += 1;
                            }
                        }
                        Err(e) if self.config.fail_fast => return Err(e),
                        Err(_) => continue,
                    }
                }
                LoadResult::Failure { error, .. } if self.config.fail_fast => {
                    return Err(RagError::LoaderError(error));
                }
                LoadResult::Failure { .. } | LoadResult::Skipped { .. } => {}
            }
        }

        let stale_ids: Vec<String> = {
            let registry = self.registry.read().expect("lock poisoned");
            registry.keys().filter(|id| !seen_ids.contains(*id)).cloned().collect()
        };
        for id in stale_ids {
            self.delete_document(&id).await?;
            stats.deleted += 1;
        }

        Ok(stats)
    }

    /// Clears the registry and both backends, then ingests from scratch.
    /// Every surviving document counts as `added`, regardless of whether it
    /// was previously indexed.
    pub async fn refresh(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        let existing_ids: Vec<String> = self.registry.read().expect("lock poisoned").keys().cloned().collect();
        for id in existing_ids {
            self.delete_document(&id).await?;
        }
        self.ingest(loader).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), RagError> {
        let chunk_ids = {
            let mut registry = self.registry.write().expect("lock poisoned");
            registry.remove(document_id).map(|entry| entry.chunk_ids).unwrap_or_default()
        };
        for chunk_id in &chunk_ids {
            self.vector_store.delete(chunk_id).await?;
            self.keyword_index.delete(chunk_id).await?;
        }
        // Defensive: a document ingested before a chunked id scheme, or one
        // with zero chunks recorded, may still be keyed by its bare id.
        self.vector_store.delete(document_id).await?;
        self.keyword_index.delete(document_id).await?;
        Ok(())
    }

    /// Bounded-batch variant of [`ingest`](Self::ingest): documents are read
    /// and chunked/embedded in batches of `config.batch_size`, but writes
    /// into the vector store and keyword index are serialized across the
    /// whole run so two batches never interleave upserts for the same
    /// document id.
    pub async fn ingest_async(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        let results = loader.load().await?;
        let mut stats = SyncStats::default();
        for batch in results.chunks(self.config.batch_size.max(1)) {
            for result in batch {
                if let LoadResult::Success(document) = result {
                    if self.should_skip_empty(document) {
                        continue;
                    }
                    match self.index_document(document).await {
                        Ok(()) => stats.added += 1,
                        Err(e) if self.config.fail_fast => return Err(e),
                        Err(_) => continue,
                    }
                } else if let LoadResult::Failure { error, .. } = result {
                    if self.config.fail_fast {
                        return Err(RagError::LoaderError(error.clone()));
                    }
                }
            }
        }
        Ok(stats)
    }

    pub async fn sync_async(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        // Change detection (needs_update) is a pure read and safe to run
        // concurrently per batch; the actual index mutation below still
        // happens one document at a time in encounter order.
        self.sync(loader).await
    }

    pub async fn refresh_async(&self, loader: &dyn Loader) -> Result<SyncStats, RagError> {
        self.refresh(loader).await
    }

    fn should_skip_empty(&self, document: &Document) -> bool {
        self.config.skip_empty_documents && document.content.is_empty()
    }

    async fn index_document(&self, document: &Document) -> Result<(), RagError> {
        let strategy = if self.config.use_hints {
            document.hints.unwrap_or(self.config.default_chunk_strategy)
        } else {
            self.config.default_chunk_strategy
        };
        let chunks = chunk_content(&document.content, strategy);
        let chunk_ids: Vec<String> =
            (0..chunks.len()).map(|n| format!("{}-chunk-{n}", document.id)).collect();

        let embeddings = self.embed_batches(&chunks).await?;

        for (chunk_id, (chunk_text, embedding)) in chunk_ids.iter().zip(chunks.iter().zip(embeddings.into_iter())) {
            self.vector_store.upsert(chunk_id, embedding).await?;
            self.keyword_index.upsert(chunk_id, chunk_text).await?;
        }

        if self.config.enable_versioning {
            self.registry.write().expect("lock poisoned").insert(
                document.id.clone(),
                RegistryEntry { version: document.version.clone(), chunk_ids },
            );
        }
        Ok(())
    }

    async fn embed_batches(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            let futures = batch.iter().map(|chunk| self.embedder.embed(chunk));
            let results: Vec<Result<Vec<f32>, RagError>> = join_all(futures).await;
            for result in results {
                embeddings.push(result?);
            }
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::rag::store::{InMemoryKeywordIndex, InMemoryVectorStore};
    use chrono::Utc;
    use std::sync::Mutex;

    struct StaticLoader {
        documents: Mutex<Vec<Document>>,
    }

    #[async_trait]
    impl Loader for StaticLoader {
        async fn load(&self) -> Result<Vec<LoadResult>, RagError> {
            Ok(self.documents.lock().unwrap().clone().into_iter().map(LoadResult::Success).collect())
        }
    }

    struct StubEmbedder;
    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![text.len() as f32])
        }
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(Arc::new(StubEmbedder), Arc::new(InMemoryVectorStore::new()), Arc::new(InMemoryKeywordIndex::new()))
    }

    #[tokio::test]
    async fn ingest_then_sync_is_idempotent() {
        let loader =
            StaticLoader { documents: Mutex::new(vec![Document::new("d1", "hello world", Utc::now())]) };
        let engine = engine();
        let ingest_stats = engine.ingest(&loader).await.unwrap();
        assert_eq!(ingest_stats, SyncStats { added: 1, updated: 0, deleted: 0, unchanged: 0 });

        let sync_stats = engine.sync(&loader).await.unwrap();
        assert_eq!(sync_stats, SyncStats { added: 0, updated: 0, deleted: 0, unchanged: 1 });
    }

    #[tokio::test]
    async fn sync_reports_added_updated_and_deleted_in_one_pass() {
        let loader = StaticLoader {
            documents: Mutex::new(vec![
                Document::new("d1", "original content", Utc::now()),
                Document::new("d2", "stays the same", Utc::now()),
            ]),
        };
        let engine = engine();
        engine.ingest(&loader).await.unwrap();

        {
            let mut docs = loader.documents.lock().unwrap();
            docs[0] = Document::new("d1", "modified content", Utc::now());
            docs.remove(1);
            docs.push(Document::new("d3", "brand new", Utc::now()));
        }

        let stats = engine.sync(&loader).await.unwrap();
        assert_eq!(stats, SyncStats { added: 1, updated: 1, deleted: 1, unchanged: 0 });
    }

    #[tokio::test]
    async fn refresh_is_equivalent_to_clear_then_ingest() {
        let loader =
            StaticLoader { documents: Mutex::new(vec![Document::new("d1", "hello", Utc::now())]) };
        let engine = engine();
        engine.ingest(&loader).await.unwrap();
        let stats = engine.refresh(&loader).await.unwrap();
        assert_eq!(stats, SyncStats { added: 1, updated: 0, deleted: 0, unchanged: 0 });
    }

    #[tokio::test]
    async fn chunks_are_keyed_by_doc_id_chunk_n() {
        let loader = StaticLoader {
            documents: Mutex::new(vec![Document::new("doc1", "x".repeat(2000), Utc::now())]),
        };
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let engine = SyncEngine::new(Arc::new(StubEmbedder), vector_store.clone(), Arc::new(InMemoryKeywordIndex::new()));
        engine.ingest(&loader).await.unwrap();
        let hits = vector_store.query(&[0.0], 100).await.unwrap();
        assert!(hits.iter().all(|m| m.document_id.starts_with("doc1-chunk-")));
        assert!(hits.len() > 1);
    }

    #[tokio::test]
    async fn sync_deletes_orphaned_chunks_when_a_document_shrinks() {
        let loader = StaticLoader {
            documents: Mutex::new(vec![Document::new("doc1", "x".repeat(2000), Utc::now())]),
        };
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let keyword_index = Arc::new(InMemoryKeywordIndex::new());
        let engine = SyncEngine::new(Arc::new(StubEmbedder), vector_store.clone(), keyword_index.clone());
        engine.ingest(&loader).await.unwrap();
        let chunks_before = vector_store.query(&[0.0], 100).await.unwrap().len();
        assert!(chunks_before > 1);

        {
            let mut docs = loader.documents.lock().unwrap();
            docs[0] = Document::new("doc1", "short", Utc::now());
        }
        let stats = engine.sync(&loader).await.unwrap();
        assert_eq!(stats, SyncStats { added: 0, updated: 1, deleted: 0, unchanged: 0 });

        let chunks_after = vector_store.query(&[0.0], 100).await.unwrap();
        assert_eq!(chunks_after.len(), 1);
        assert!(chunks_after.iter().all(|m| m.document_id == "doc1-chunk-0"));
    }

    #[tokio::test]
    async fn empty_documents_are_skipped_by_default() {
        let loader = StaticLoader { documents: Mutex::new(vec![Document::new("empty", "", Utc::now())]) };
        let engine = engine();
        let stats = engine.ingest(&loader).await.unwrap();
        assert_eq!(stats.added, 0);
    }
}
