//! Semantic, type-filtered and hybrid search over the vector store.

use crate::embedding::EmbeddingAdapter;
use crate::error::RetrievalError;
use castgraph::{HybridHit, HybridParams, SimilarityHit, SourceType, VectorRecord, VectorStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct HybridRetrievalService {
    store: Arc<VectorStore>,
    embedder: EmbeddingAdapter,
    params: HybridParams,
    max_limit: usize,
}

impl HybridRetrievalService {
    pub fn new(store: Arc<VectorStore>, embedder: EmbeddingAdapter) -> Self {
        Self {
            store,
            embedder,
            params: HybridParams::default(),
            max_limit: 100,
        }
    }

    pub fn with_params(mut self, params: HybridParams) -> Self {
        self.params = params;
        self
    }

    /// Cap applied to every requested limit. Values below 1 are treated as 1.
    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn clamp(&self, limit: usize) -> usize {
        limit.min(self.max_limit)
    }

    /// Embed `text` and insert or replace the record for
    /// `(source_type, source_id)`.
    pub fn upsert(
        &self,
        source_type: SourceType,
        source_id: i64,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<VectorRecord, RetrievalError> {
        let embedding = self.embedder.embed(text);
        debug!(
            %source_type,
            source_id,
            fallback = embedding.is_fallback(),
            "indexing text chunk"
        );
        Ok(self
            .store
            .upsert(source_type, source_id, text, embedding.vector, metadata)?)
    }

    pub fn delete(&self, source_type: SourceType, source_id: i64) -> Result<bool, RetrievalError> {
        Ok(self.store.delete(source_type, source_id)?)
    }

    /// Records nearest to `query_text`, nearest first.
    pub fn search_similar(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, RetrievalError> {
        self.similar(query_text, None, limit)
    }

    pub fn search_similar_by_type(
        &self,
        query_text: &str,
        source_type: SourceType,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, RetrievalError> {
        self.similar(query_text, Some(source_type), limit)
    }

    fn similar(
        &self,
        query_text: &str,
        source_type: Option<SourceType>,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>, RetrievalError> {
        let limit = self.clamp(limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text);
        Ok(self.store.search_similar(&query.vector, limit, source_type)?)
    }

    /// Records that lexically match `keyword`, re-ranked by the weighted
    /// vector and keyword score.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::InvalidArgument`] for a blank keyword. Plain
    /// similarity search is [`search_similar`](Self::search_similar).
    pub fn hybrid_search(
        &self,
        query_text: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<HybridHit>, RetrievalError> {
        if keyword.trim().is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "hybrid search requires a non-blank keyword".into(),
            ));
        }
        let limit = self.clamp(limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text);
        Ok(self
            .store
            .hybrid_search(&query.vector, keyword, limit, self.params)?)
    }
}
