// src/cloudllm/rag/search.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cloudllm::rag::store::{KeywordIndex, ScoredMatch, VectorStore};
use crate::cloudllm::rag::RagError;

/// How many candidates each backend is asked for before fusion, relative to
/// the caller's requested `k` — large enough that reciprocal-rank and
/// min-max normalization see a meaningful tail from both rankings instead of
/// just the top handful.
const CANDIDATE_OVERFETCH: usize = 4;

/// One fused result: the document id, its combined score, and (for
/// debugging/observability) the rank each backend gave it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchResult {
    pub document_id: String,
    pub score: f32,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

/// How the vector-similarity ranking and the keyword-relevance ranking are
/// combined into one ordered list.
#[derive(Debug, Clone, Copy)]
pub enum FusionStrategy {
    /// Reciprocal Rank Fusion: `score = Σ 1/(c + rank)` across whichever
    /// lists a document appears in. `c` defaults to 60, the constant the
    /// original RRF paper and most hybrid-search implementations settle on.
    Rrf { c: f32 },
    /// Min-max normalize each list to `[0, 1]`, then combine
    /// `wv * vector_score + wk * keyword_score`. Ties favor the vector score.
    WeightedScore { vector_weight: f32, keyword_weight: f32 },
    /// Pass through the vector ranking unchanged; the keyword index is never queried.
    VectorOnly,
    /// Pass through the keyword ranking unchanged; the vector store is never queried.
    KeywordOnly,
}

impl FusionStrategy {
    pub fn rrf() -> Self {
        FusionStrategy::Rrf { c: 60.0 }
    }
}

/// Reranks an already-fused candidate list, e.g. with a cross-encoder.
/// Optional: [`HybridSearch::search`] only consults one if configured.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<HybridSearchResult>,
    ) -> Result<Vec<HybridSearchResult>, RagError>;
}

/// Fuses a [`VectorStore`] and [`KeywordIndex`] into one ranked result list,
/// with an optional reranking pass over the fused head.
pub struct HybridSearch {
    vector_store: Arc<dyn VectorStore>,
    keyword_index: Arc<dyn KeywordIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_top_k: usize,
}

impl HybridSearch {
    pub fn new(vector_store: Arc<dyn VectorStore>, keyword_index: Arc<dyn KeywordIndex>) -> Self {
        HybridSearch { vector_store, keyword_index, reranker: None, rerank_top_k: 50 }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>, rerank_top_k: usize) -> Self {
        self.reranker = Some(reranker);
        self.rerank_top_k = rerank_top_k;
        self
    }

    pub async fn search(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        k: usize,
        fusion: FusionStrategy,
    ) -> Result<Vec<HybridSearchResult>, RagError> {
        let overfetch = (k * CANDIDATE_OVERFETCH).max(self.rerank_top_k).max(k);

        let fused = match fusion {
            FusionStrategy::VectorOnly => {
                let vector_hits = self.vector_store.query(query_embedding, overfetch).await?;
                vector_hits
                    .into_iter()
                    .enumerate()
                    .map(|(rank, m)| HybridSearchResult {
                        document_id: m.document_id,
                        score: m.score,
                        vector_rank: Some(rank),
                        keyword_rank: None,
                    })
                    .collect()
            }
            FusionStrategy::KeywordOnly => {
                let keyword_hits = self.keyword_index.query(query_text, overfetch).await?;
                keyword_hits
                    .into_iter()
                    .enumerate()
                    .map(|(rank, m)| HybridSearchResult {
                        document_id: m.document_id,
                        score: m.score,
                        vector_rank: None,
                        keyword_rank: Some(rank),
                    })
                    .collect()
            }
            FusionStrategy::Rrf { c } => {
                let (vector_hits, keyword_hits) = self.fetch_both(query_embedding, query_text, overfetch).await?;
                fuse_rrf(vector_hits, keyword_hits, c)
            }
            FusionStrategy::WeightedScore { vector_weight, keyword_weight } => {
                let (vector_hits, keyword_hits) = self.fetch_both(query_embedding, query_text, overfetch).await?;
                fuse_weighted(vector_hits, keyword_hits, vector_weight, keyword_weight)
            }
        };

        let mut fused = fused;
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let results = if let Some(reranker) = &self.reranker {
            let head: Vec<HybridSearchResult> = fused.into_iter().take(self.rerank_top_k).collect();
            reranker.rerank(query_text, head).await?
        } else {
            fused
        };

        Ok(results.into_iter().take(k).collect())
    }

    async fn fetch_both(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        overfetch: usize,
    ) -> Result<(Vec<ScoredMatch>, Vec<ScoredMatch>), RagError> {
        let vector_hits = self.vector_store.query(query_embedding, overfetch).await?;
        let keyword_hits = self.keyword_index.query(query_text, overfetch).await?;
        Ok((vector_hits, keyword_hits))
    }
}

fn fuse_rrf(vector_hits: Vec<ScoredMatch>, keyword_hits: Vec<ScoredMatch>, c: f32) -> Vec<HybridSearchResult> {
    let mut ranks: HashMap<String, (Option<usize>, Option<usize>)> = HashMap::new();
    for (rank, m) in vector_hits.into_iter().enumerate() {
        ranks.entry(m.document_id).or_insert((None, None)).0 = Some(rank);
    }
    for (rank, m) in keyword_hits.into_iter().enumerate() {
        ranks.entry(m.document_id).or_insert((None, None)).1 = Some(rank);
    }

    ranks
        .into_iter()
        .map(|(document_id, (vector_rank, keyword_rank))| {
            let mut score = 0.0;
            if let Some(r) = vector_rank {
                score += 1.0 / (c + r as f32 + 1.0);
            }
            if let Some(r) = keyword_rank {
                score += 1.0 / (c + r as f32 + 1.0);
            }
            HybridSearchResult { document_id, score, vector_rank, keyword_rank }
        })
        .collect()
}

fn fuse_weighted(
    vector_hits: Vec<ScoredMatch>,
    keyword_hits: Vec<ScoredMatch>,
    vector_weight: f32,
    keyword_weight: f32,
) -> Vec<HybridSearchResult> {
    let vector_norm = min_max_normalize(&vector_hits);
    let keyword_norm = min_max_normalize(&keyword_hits);

    let mut ranks: HashMap<String, (Option<usize>, Option<usize>)> = HashMap::new();
    for (rank, m) in vector_hits.iter().enumerate() {
        ranks.entry(m.document_id.clone()).or_insert((None, None)).0 = Some(rank);
    }
    for (rank, m) in keyword_hits.iter().enumerate() {
        ranks.entry(m.document_id.clone()).or_insert((None, None)).1 = Some(rank);
    }

    ranks
        .into_iter()
        .map(|(document_id, (vector_rank, keyword_rank))| {
            let vs = vector_norm.get(&document_id).copied().unwrap_or(0.0);
            let ks = keyword_norm.get(&document_id).copied().unwrap_or(0.0);
            let score = vector_weight * vs + keyword_weight * ks;
            HybridSearchResult { document_id, score, vector_rank, keyword_rank }
        })
        .collect()
}

/// Min-max normalizes a score list to `[0, 1]`; a single-candidate or
/// all-equal list normalizes to 1.0 for every entry rather than dividing by
/// zero.
fn min_max_normalize(matches: &[ScoredMatch]) -> HashMap<String, f32> {
    if matches.is_empty() {
        return HashMap::new();
    }
    let min = matches.iter().map(|m| m.score).fold(f32::INFINITY, f32::min);
    let max = matches.iter().map(|m| m.score).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    matches
        .iter()
        .map(|m| {
            let normalized = if range.abs() < f32::EPSILON { 1.0 } else { (m.score - min) / range };
            (m.document_id.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::rag::store::{InMemoryKeywordIndex, InMemoryVectorStore};

    async fn seeded_stores() -> (InMemoryVectorStore, InMemoryKeywordIndex) {
        let vectors = InMemoryVectorStore::new();
        vectors.upsert("doc1", vec![1.0, 0.0]).await.unwrap();
        vectors.upsert("doc2", vec![0.0, 1.0]).await.unwrap();
        vectors.upsert("doc3", vec![0.7, 0.7]).await.unwrap();

        let keywords = InMemoryKeywordIndex::new();
        keywords.upsert("doc1", "rust async runtime").await.unwrap();
        keywords.upsert("doc2", "python data science").await.unwrap();
        keywords.upsert("doc3", "rust data pipeline").await.unwrap();
        (vectors, keywords)
    }

    #[tokio::test]
    async fn rrf_favors_documents_ranked_highly_by_both_backends() {
        let (vectors, keywords) = seeded_stores().await;
        let search = HybridSearch::new(Arc::new(vectors), Arc::new(keywords));
        let results = search.search(&[1.0, 0.0], "rust async", 3, FusionStrategy::rrf()).await.unwrap();
        assert_eq!(results[0].document_id, "doc1");
    }

    #[tokio::test]
    async fn vector_only_ignores_the_keyword_index() {
        let (vectors, keywords) = seeded_stores().await;
        let search = HybridSearch::new(Arc::new(vectors), Arc::new(keywords));
        let results = search.search(&[0.0, 1.0], "irrelevant text", 1, FusionStrategy::VectorOnly).await.unwrap();
        assert_eq!(results[0].document_id, "doc2");
        assert!(results[0].keyword_rank.is_none());
    }

    #[tokio::test]
    async fn weighted_score_normalizes_before_combining() {
        let (vectors, keywords) = seeded_stores().await;
        let search = HybridSearch::new(Arc::new(vectors), Arc::new(keywords));
        let results = search
            .search(
                &[0.7, 0.7],
                "rust data",
                3,
                FusionStrategy::WeightedScore { vector_weight: 0.5, keyword_weight: 0.5 },
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results[0].score >= results.last().unwrap().score);
    }

    struct UppercaseIdReranker;
    #[async_trait]
    impl Reranker for UppercaseIdReranker {
        async fn rerank(
            &self,
            _query: &str,
            mut candidates: Vec<HybridSearchResult>,
        ) -> Result<Vec<HybridSearchResult>, RagError> {
            candidates.reverse();
            Ok(candidates)
        }
    }

    #[tokio::test]
    async fn reranker_output_is_what_search_returns() {
        let (vectors, keywords) = seeded_stores().await;
        let search = HybridSearch::new(Arc::new(vectors), Arc::new(keywords))
            .with_reranker(Arc::new(UppercaseIdReranker), 10);
        let plain_fused = {
            let (vectors, keywords) = seeded_stores().await;
            HybridSearch::new(Arc::new(vectors), Arc::new(keywords))
        };
        let unranked = plain_fused.search(&[1.0, 0.0], "rust", 3, FusionStrategy::rrf()).await.unwrap();
        let reranked = search.search(&[1.0, 0.0], "rust", 3, FusionStrategy::rrf()).await.unwrap();
        assert_eq!(reranked, unranked.into_iter().rev().collect::<Vec<_>>());
    }
}
