//! Cosine scoring for the in-memory snapshot. A record's norm is computed once, when the
//! record enters a snapshot, and shared by every later search.

use std::sync::Arc;

use super::EmbeddingRecord;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

/// A stored record plus its cached norm. Cloning shares the record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NormedRecord {
    pub(crate) record: Arc<EmbeddingRecord>,
    pub(crate) norm: f32,
}

impl NormedRecord {
    pub(crate) fn new(record: EmbeddingRecord) -> Self {
        let norm = l2_norm(&record.embedding);
        Self {
            record: Arc::new(record),
            norm,
        }
    }

    /// `None` for a zero vector, which has no direction to compare.
    fn score(&self, query: &[f32], query_norm: f32) -> Option<f32> {
        if self.norm == 0.0 {
            return None;
        }
        Some(cosine_similarity(query, &self.record.embedding, query_norm, self.norm))
    }
}

/// Positions and scores of the `k` best entries, best first. Equal scores keep the order
/// of `entries`.
pub(crate) fn rank(entries: &[NormedRecord], query: &[f32], query_norm: f32, k: usize) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.score(query, query_norm).map(|s| (i, s)))
        .collect();
    // Stable sort.
    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
    hits.truncate(k);
    hits
}
