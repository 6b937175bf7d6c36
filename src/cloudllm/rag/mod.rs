// src/cloudllm/rag/mod.rs

//! A hybrid retrieval-augmented generation pipeline: document ingestion with
//! content-hash versioning ([`sync`]), pluggable vector/keyword backends
//! ([`store`]), and a fusion search layer over both ([`search`]).
//!
//! Concrete embedding models and on-disk vector/keyword engines are
//! collaborators this crate does not ship — [`store::VectorStore`] and
//! [`store::KeywordIndex`] are traits with simple in-memory reference
//! implementations for tests, the same "define the seam, let callers bring
//! the backend" shape as the teacher's `ToolProtocol`.

pub mod document;
pub mod search;
pub mod store;
pub mod sync;

pub use document::{chunk_content, ChunkStrategy, Document, DocumentVersion, LoadResult, Loader};
pub use search::{FusionStrategy, HybridSearch, HybridSearchResult, Reranker};
pub use store::{InMemoryKeywordIndex, InMemoryVectorStore, KeywordIndex, ScoredMatch, VectorStore};
pub use sync::{Embedder, SyncConfig, SyncEngine, SyncStats};

use std::fmt;

/// Errors raised by the RAG subsystem. Kept separate from
/// [`crate::error::AgentError`] because document sync and hybrid search
/// fail in ways an agent loop never does (a stale version conflict, a
/// backend with no entry for a document id) — collapsing them into one
/// enum would force every match arm in both subsystems to handle cases
/// that can't occur on their side.
#[derive(Debug, Clone)]
pub enum RagError {
    NotFound(String),
    StoreError(String),
    LoaderError(String),
    /// The document being synced has a newer `updated_at` on the loader
    /// side than what `needs_update` observed, i.e. it changed mid-sync.
    SyncConflict(String),
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagError::NotFound(id) => write!(f, "document not found: {id}"),
            RagError::StoreError(msg) => write!(f, "store error: {msg}"),
            RagError::LoaderError(msg) => write!(f, "loader error: {msg}"),
            RagError::SyncConflict(msg) => write!(f, "sync conflict: {msg}"),
        }
    }
}

impl std::error::Error for RagError {}
