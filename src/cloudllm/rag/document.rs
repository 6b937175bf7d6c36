// src/cloudllm/rag/document.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::cloudllm::rag::RagError;

/// Content-hash version of a [`Document`], computed with SHA-256 the same
/// way the teacher's `ThoughtChain` hash-chains its entries
/// (`thought_chain.rs`) — here used to detect whether a document changed
/// since the last sync without storing its full prior content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentVersion {
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl DocumentVersion {
    pub fn compute(content: &str, updated_at: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let content_hash = format!("{:x}", hasher.finalize());
        DocumentVersion { content_hash, updated_at }
    }
}

/// How a document's content should be split into chunks before embedding.
/// Carried as a per-document hint so a loader that already knows its source
/// material's shape (fixed-width log lines vs. prose) can steer chunking
/// without the sync engine needing to sniff content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkStrategy {
    /// Fixed-size character windows with the given overlap.
    FixedSize { size: usize, overlap: usize },
    /// Split on blank lines (paragraph breaks), never splitting mid-paragraph.
    Paragraph,
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        ChunkStrategy::FixedSize { size: 800, overlap: 100 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub version: DocumentVersion,
    pub hints: Option<ChunkStrategy>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        let content = content.into();
        let version = DocumentVersion::compute(&content, updated_at);
        Document { id: id.into(), content, metadata: HashMap::new(), version, hints: None }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_hints(mut self, strategy: ChunkStrategy) -> Self {
        self.hints = Some(strategy);
        self
    }
}

/// One document-loading outcome. A loader reports one of these per source
/// item rather than failing the whole load on a single bad document, so a
/// sync run can make progress on everything that loaded cleanly.
#[derive(Debug, Clone)]
pub enum LoadResult {
    Success(Document),
    /// `retryable` is advisory only — the sync engine never retries on its own.
    Failure { source: String, error: String, retryable: bool },
    Skipped { source: String, reason: String },
}

/// The boundary between this crate and wherever documents actually live
/// (a filesystem tree, a CMS, a database). Concrete loaders are
/// collaborators this crate does not ship. `load` returns the full, finite
/// set of [`LoadResult`]s for one pass; callers that need true streaming can
/// implement this over a paginated source and collect as they go.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self) -> Result<Vec<LoadResult>, RagError>;
}

/// Splits `content` into chunks per `strategy`. Used by the sync engine
/// before embedding; exposed so loaders/tests can predict chunk ids
/// (`"<docId>-chunk-<N>"`).
pub fn chunk_content(content: &str, strategy: ChunkStrategy) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    match strategy {
        ChunkStrategy::FixedSize { size, overlap } => chunk_fixed_size(content, size, overlap),
        ChunkStrategy::Paragraph => chunk_paragraphs(content),
    }
}

fn chunk_fixed_size(content: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= size {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let stride = size - overlap;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride.max(1);
    }
    chunks
}

fn chunk_paragraphs(content: &str) -> Vec<String> {
    let chunks: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if chunks.is_empty() {
        vec![content.to_string()]
    } else {
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_size_chunking_produces_overlapping_windows() {
        let content = "a".repeat(1000);
        let chunks = chunk_content(&content, ChunkStrategy::FixedSize { size: 400, overlap: 50 });
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 400));
    }

    #[test]
    fn short_content_is_a_single_chunk() {
        let chunks = chunk_content("hello world", ChunkStrategy::FixedSize { size: 800, overlap: 100 });
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn paragraph_chunking_splits_on_blank_lines() {
        let content = "first paragraph\nstill first\n\nsecond paragraph";
        let chunks = chunk_content(content, ChunkStrategy::Paragraph);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_content("", ChunkStrategy::default()).is_empty());
    }
}
