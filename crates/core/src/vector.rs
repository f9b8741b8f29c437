//! In-memory vector index for semantic similarity search.
//!
//! Flat (brute-force) cosine distance over pre-computed embeddings, keyed by
//! the record key `"{source_type}:{source_id}"`. The redb tables in
//! [`crate::VectorStore`] are the source of truth; this index is a
//! read-optimised cache of them, rebuilt on open.
//!
//! # Complexity
//! - `insert`: O(1) amortised (O(n) when replacing)
//! - `remove`: O(n) swap-remove
//! - `nearest`: O(n·d) where d is the embedding dimension

use crate::{MirrorError, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    embedding: Vec<f32>,
}

/// Flat vector index keyed by record key.
#[derive(Debug, Default, Clone)]
pub(crate) struct VectorIndex {
    entries: Vec<Entry>,
    /// Expected embedding dimension. Set on first insert.
    dim: Option<usize>,
}

impl VectorIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the embedding for `key`.
    pub(crate) fn insert(&mut self, key: String, embedding: Vec<f32>) -> Result<()> {
        if embedding.is_empty() {
            return Err(MirrorError::InvalidEmbedding(
                "embedding must not be empty".into(),
            ));
        }
        match self.dim {
            None => self.dim = Some(embedding.len()),
            Some(d) if d != embedding.len() => {
                return Err(MirrorError::InvalidEmbedding(format!(
                    "embedding dimension mismatch: expected {d}, got {}",
                    embedding.len()
                )));
            }
            Some(_) => {}
        }

        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.embedding = embedding;
        } else {
            self.entries.push(Entry { key, embedding });
        }
        Ok(())
    }

    /// Remove the entry for `key`. No-op if absent.
    pub(crate) fn remove(&mut self, key: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e.key == key) {
            self.entries.swap_remove(pos);
        }
    }

    /// The `k` entries nearest to `query` by cosine distance, restricted to
    /// keys accepted by `allow`.
    ///
    /// Ascending distance; equal distances order by key. Empty when `k` is
    /// zero or the query is the zero vector.
    pub(crate) fn nearest(
        &self,
        query: &[f32],
        k: usize,
        allow: impl Fn(&str) -> bool,
    ) -> Vec<(String, f32)> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        let query_norm = l2_norm(query);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter(|e| allow(&e.key))
            .map(|e| {
                let distance = 1.0 - cosine_similarity(query, &e.embedding, query_norm);
                (e.key.clone(), distance)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Cosine distance between `query` and the stored embedding for `key`.
    pub(crate) fn distance_to(&self, key: &str, query: &[f32]) -> Option<f32> {
        let query_norm = l2_norm(query);
        if query_norm == 0.0 {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| 1.0 - cosine_similarity(query, &e.embedding, query_norm))
    }

    pub(crate) fn embedding(&self, key: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.embedding.as_slice())
    }

    pub(crate) fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Math helpers
// ---------------------------------------------------------------------------

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between `a` and `b`, with `a_norm` pre-computed.
///
/// Returns `0.0` if `b` is the zero vector or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let b_norm = l2_norm(b);
    if b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

/// Cosine distance `1 - cos(a, b)`, in `[0.0, 2.0]`. Lower is more similar.
///
/// Zero vectors and mismatched lengths have distance `1.0` (no direction).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let a_norm = l2_norm(a);
    if a_norm == 0.0 {
        return 1.0;
    }
    1.0 - cosine_similarity(a, b, a_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_all(_: &str) -> bool {
        true
    }

    #[test]
    fn test_cosine_distance_identical_is_zero() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal_is_one() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite_is_two() {
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector_is_neutral() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut idx = VectorIndex::new();
        idx.insert("scene:1".into(), vec![1.0, 0.0]).unwrap();
        idx.insert("scene:1".into(), vec![0.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.embedding("scene:1"), Some(&[0.0f32, 1.0][..]));
    }

    #[test]
    fn test_insert_rejects_empty_and_mismatched() {
        let mut idx = VectorIndex::new();
        assert!(matches!(
            idx.insert("scene:1".into(), vec![]),
            Err(MirrorError::InvalidEmbedding(_))
        ));
        idx.insert("scene:1".into(), vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            idx.insert("scene:2".into(), vec![1.0, 0.0, 0.0]),
            Err(MirrorError::InvalidEmbedding(_))
        ));
        assert_eq!(idx.len(), 1, "failed insert must leave index intact");
    }

    #[test]
    fn test_remove_nonexistent_is_noop() {
        let mut idx = VectorIndex::new();
        idx.insert("scene:1".into(), vec![1.0, 0.0]).unwrap();
        idx.remove("scene:9");
        assert_eq!(idx.len(), 1);
        idx.remove("scene:1");
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn test_nearest_orders_by_ascending_distance() {
        let mut idx = VectorIndex::new();
        idx.insert("a".into(), vec![-1.0, 0.0, 0.0]).unwrap();
        idx.insert("b".into(), vec![1.0, 0.0, 0.0]).unwrap();
        idx.insert("c".into(), vec![0.0, 1.0, 0.0]).unwrap();

        let hits = idx.nearest(&[1.0, 0.0, 0.0], 3, allow_all);
        let keys: Vec<&str> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert!(hits[0].1.abs() < 1e-6);
        assert!((hits[2].1 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_ties_break_by_key_and_truncate() {
        let mut idx = VectorIndex::new();
        for key in ["d", "b", "c", "a"] {
            idx.insert(key.into(), vec![1.0, 0.0]).unwrap();
        }
        let hits = idx.nearest(&[1.0, 0.0], 2, allow_all);
        let keys: Vec<&str> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_nearest_respects_filter() {
        let mut idx = VectorIndex::new();
        idx.insert("scene:1".into(), vec![1.0, 0.0]).unwrap();
        idx.insert("dialogue:1".into(), vec![1.0, 0.0]).unwrap();
        let hits = idx.nearest(&[1.0, 0.0], 10, |k| k.starts_with("scene:"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "scene:1");
    }

    #[test]
    fn test_nearest_zero_query_returns_empty() {
        let mut idx = VectorIndex::new();
        idx.insert("scene:1".into(), vec![1.0, 0.0]).unwrap();
        assert!(idx.nearest(&[0.0, 0.0], 5, allow_all).is_empty());
        assert!(idx.distance_to("scene:1", &[0.0, 0.0]).is_none());
    }
}
