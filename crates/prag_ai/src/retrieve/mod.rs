use prag_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::index::{ScoredRecord, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub query: String,
    /// Best first, at most `k` entries.
    pub hits: Vec<ScoredRecord>,
    /// Hits dropped for scoring below the threshold.
    pub below_threshold: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Embed `query` with the model recorded in the index and return the `k` most similar records.
///
/// An index with no records is `INDEX_EMPTY`; an index with records but nothing above
/// `min_score` is a valid, empty result. The search runs against the index as it was when
/// the call started.
pub fn retrieve(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
    min_score: Option<f32>,
) -> Result<RetrievalResult, AppError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(AppError::new(codes::QUERY_INVALID, "Query must not be empty"));
    }
    if k == 0 {
        return Err(AppError::new(codes::CONFIG_INVALID, "top_k must be at least 1"));
    }
    // One committed state for every read below, even if a write lands mid-query.
    let view = index.view();
    if view.is_empty() {
        return Err(AppError::new(
            codes::INDEX_EMPTY,
            "The index is empty; index documents first",
        ));
    }
    let model = view.embedding_model().ok_or_else(|| {
        AppError::new(codes::INDEX_CORRUPT, "Index has records but no embedding model recorded")
    })?;

    let qv = embedder.embed(model, q)?;
    let mut hits = view.search(&qv, k)?;

    let before = hits.len();
    if let Some(threshold) = min_score {
        hits.retain(|h| h.score >= threshold);
    }
    let below_threshold = before - hits.len();
    if below_threshold > 0 {
        tracing::debug!(below_threshold, "dropped hits under min_score");
    }

    Ok(RetrievalResult {
        query: q.to_string(),
        hits,
        below_threshold,
    })
}
