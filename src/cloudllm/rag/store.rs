// src/cloudllm/rag/store.rs

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::cloudllm::rag::RagError;

/// A single scored match returned by either backend, before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub document_id: String,
    pub score: f32,
}

/// A pluggable embedding-vector backend. Concrete on-disk vector databases
/// are collaborators this crate does not ship; see [`InMemoryVectorStore`]
/// for the reference implementation used in tests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, document_id: &str, embedding: Vec<f32>) -> Result<(), RagError>;
    async fn delete(&self, document_id: &str) -> Result<(), RagError>;
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, RagError>;
}

/// A pluggable keyword/full-text backend, parallel to [`VectorStore`].
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn upsert(&self, document_id: &str, content: &str) -> Result<(), RagError>;
    async fn delete(&self, document_id: &str) -> Result<(), RagError>;
    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<ScoredMatch>, RagError>;
}

/// Reference [`VectorStore`] backed by brute-force cosine similarity over
/// an in-memory map. Adequate for tests and small corpora; not meant to
/// stand in for a production vector database.
#[derive(Default)]
pub struct InMemoryVectorStore {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        InMemoryVectorStore { vectors: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, document_id: &str, embedding: Vec<f32>) -> Result<(), RagError> {
        self.vectors
            .write()
            .map_err(|_| RagError::StoreError("vector store lock poisoned".into()))?
            .insert(document_id.to_string(), embedding);
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), RagError> {
        self.vectors
            .write()
            .map_err(|_| RagError::StoreError("vector store lock poisoned".into()))?
            .remove(document_id);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, RagError> {
        let vectors = self.vectors.read().map_err(|_| RagError::StoreError("vector store lock poisoned".into()))?;
        let mut scored: Vec<ScoredMatch> = vectors
            .iter()
            .map(|(id, vector)| ScoredMatch { document_id: id.clone(), score: cosine_similarity(embedding, vector) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let dot: f32 = a[..len].iter().zip(&b[..len]).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Reference [`KeywordIndex`] scoring by normalized term overlap. Good
/// enough to exercise fusion logic in tests; not a real BM25/Lucene
/// replacement.
#[derive(Default)]
pub struct InMemoryKeywordIndex {
    documents: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryKeywordIndex {
    pub fn new() -> Self {
        InMemoryKeywordIndex { documents: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl KeywordIndex for InMemoryKeywordIndex {
    async fn upsert(&self, document_id: &str, content: &str) -> Result<(), RagError> {
        let tokens = tokenize(content);
        self.documents
            .write()
            .map_err(|_| RagError::StoreError("keyword index lock poisoned".into()))?
            .insert(document_id.to_string(), tokens);
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), RagError> {
        self.documents
            .write()
            .map_err(|_| RagError::StoreError("keyword index lock poisoned".into()))?
            .remove(document_id);
        Ok(())
    }

    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<ScoredMatch>, RagError> {
        let query_tokens = tokenize(query);
        let documents =
            self.documents.read().map_err(|_| RagError::StoreError("keyword index lock poisoned".into()))?;
        let mut scored: Vec<ScoredMatch> = documents
            .iter()
            .filter_map(|(id, tokens)| {
                let overlap = query_tokens.iter().filter(|t| tokens.contains(t)).count();
                if overlap == 0 {
                    None
                } else {
                    Some(ScoredMatch {
                        document_id: id.clone(),
                        score: overlap as f32 / query_tokens.len().max(1) as f32,
                    })
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vector_store_ranks_by_cosine_similarity() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0]).await.unwrap();
        store.upsert("b", vec![0.0, 1.0]).await.unwrap();
        let results = store.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].document_id, "a");
    }

    #[tokio::test]
    async fn keyword_index_finds_overlapping_terms() {
        let index = InMemoryKeywordIndex::new();
        index.upsert("doc1", "the quick brown fox").await.unwrap();
        index.upsert("doc2", "a slow green turtle").await.unwrap();
        let results = index.query("quick fox", 5).await.unwrap();
        assert_eq!(results[0].document_id, "doc1");
    }

    #[tokio::test]
    async fn delete_removes_entries_from_both_backends() {
        let store = InMemoryVectorStore::new();
        store.upsert("a", vec![1.0, 0.0]).await.unwrap();
        store.delete("a").await.unwrap();
        let results = store.query(&[1.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
