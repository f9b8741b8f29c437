//! Vector similarity store: text chunks and their embeddings, keyed by the
//! relational record they were derived from.
//!
//! Rows live in redb (`records` as JSON, `embeddings` as little-endian `f32`
//! bytes). A [`VectorIndex`] cache is rebuilt from the `embeddings` table on
//! open and updated after each commit.

use crate::vector::VectorIndex;
use crate::{MirrorError, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use ulid::Ulid;

/// Record rows keyed `"{source_type}:{source_id}"`.
const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("vector_records");
/// Raw embedding bytes, same key as [`RECORDS`].
const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");
/// Single-row metadata: `"dim"` → the dimension fixed by the first insert.
const EMBEDDING_META: TableDefinition<&str, u64> = TableDefinition::new("embedding_meta");

/// The kind of relational record a text chunk was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Dialogue,
    Scene,
    Episode,
    Character,
    Concept,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Dialogue => "dialogue",
            SourceType::Scene => "scene",
            SourceType::Episode => "episode",
            SourceType::Character => "character",
            SourceType::Concept => "concept",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dialogue" => Ok(SourceType::Dialogue),
            "scene" => Ok(SourceType::Scene),
            "episode" => Ok(SourceType::Episode),
            "character" => Ok(SourceType::Character),
            "concept" => Ok(SourceType::Concept),
            other => Err(MirrorError::InvalidArgument(format!(
                "unknown source type `{other}`"
            ))),
        }
    }
}

/// Store identity of a [`VectorRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One embedded text chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: RecordId,
    pub source_type: SourceType,
    pub source_id: i64,
    pub text_chunk: String,
    /// Stored in its own table; hydrated from the index cache on read.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub record: VectorRecord,
    /// Cosine distance to the query. Lower is more similar.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridHit {
    pub record: VectorRecord,
    pub distance: f32,
    pub text_rank: f32,
    /// Weighted score the results are ordered by. Lower is better.
    pub score: f32,
}

/// Weights of the two hybrid channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridParams {
    /// Weight of cosine distance.
    pub vector_weight: f32,
    /// Weight of `1 - text_rank`.
    pub keyword_weight: f32,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

impl HybridParams {
    pub fn validate(&self) -> Result<()> {
        let finite = self.vector_weight.is_finite() && self.keyword_weight.is_finite();
        if !finite || self.vector_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(MirrorError::Search(
                "hybrid weights must be finite and non-negative".to_string(),
            ));
        }
        if self.vector_weight == 0.0 && self.keyword_weight == 0.0 {
            return Err(MirrorError::Search(
                "at least one of `vector_weight` or `keyword_weight` must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Combined score for one candidate. Lower is better.
    pub fn score(&self, distance: f32, text_rank: f32) -> f32 {
        self.vector_weight * distance + self.keyword_weight * (1.0 - text_rank)
    }
}

/// Whether `text` lexically matches `keyword`: case-insensitive substring
/// containment, which includes whole-token matches. Blank keywords match
/// nothing.
pub fn matches_keyword(text: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    !keyword.is_empty() && text.to_lowercase().contains(&keyword)
}

/// Saturating term-frequency rank of `keyword` in `text`, in `[0, 1)`.
///
/// Each token equal to the keyword counts `1.0` and each token merely
/// containing it counts `0.5`; a multi-word keyword counts `1.0` per phrase
/// occurrence. The rank is `tf / (tf + 1)`.
pub fn text_rank(text: &str, keyword: &str) -> f32 {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();

    let tf: f32 = if keyword.chars().any(|c| !c.is_alphanumeric()) {
        text.matches(keyword.as_str()).count() as f32
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| {
                if t == keyword {
                    1.0
                } else if t.contains(keyword.as_str()) {
                    0.5
                } else {
                    0.0
                }
            })
            .sum()
    };
    tf / (tf + 1.0)
}

fn record_key(source_type: SourceType, source_id: i64) -> String {
    format!("{}:{}", source_type.as_str(), source_id)
}

/// Tie-break order for equal distances or scores.
fn identity_cmp(a: &VectorRecord, b: &VectorRecord) -> Ordering {
    a.source_type
        .as_str()
        .cmp(b.source_type.as_str())
        .then(a.source_id.cmp(&b.source_id))
}

fn decode_embedding(key: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MirrorError::Storage(format!(
            "corrupt embedding for {key}: byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Embedded vector similarity store.
///
/// One record per `(source_type, source_id)`. The embedding dimension is fixed
/// by the first insert and persisted, so a reopened store rejects a model
/// change instead of mixing incomparable vectors.
pub struct VectorStore {
    db: Database,
    index: Mutex<VectorIndex>,
}

impl VectorStore {
    /// Open or create a vector store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create an in-memory vector store (no file I/O).
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(RECORDS)?;
            write_txn.open_table(EMBEDDINGS)?;
            write_txn.open_table(EMBEDDING_META)?;
            write_txn.commit()?;
        }
        let index = Self::rebuild_index(&db)?;
        Ok(Self {
            db,
            index: Mutex::new(index),
        })
    }

    fn rebuild_index(db: &Database) -> Result<VectorIndex> {
        let mut idx = VectorIndex::new();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(EMBEDDINGS)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let key = key.value();
            idx.insert(key.to_string(), decode_embedding(key, value.value())?)?;
        }
        Ok(idx)
    }

    fn lock_index(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.index
            .lock()
            .map_err(|_| MirrorError::Internal("vector index lock poisoned".into()))
    }

    /// Insert or replace the record for `(source_type, source_id)`.
    ///
    /// A replaced record keeps its `id` and `created_at`; text, embedding,
    /// metadata and `updated_at` are overwritten. The row, the embedding
    /// bytes and the dimension check-and-set share one write transaction,
    /// committed under the index lock so concurrent writers to one key leave
    /// the row and the cached embedding from the same call.
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidEmbedding`] if `embedding` is empty or its length
    /// differs from the store's established dimension.
    pub fn upsert(
        &self,
        source_type: SourceType,
        source_id: i64,
        text_chunk: &str,
        embedding: Vec<f32>,
        metadata: Option<Value>,
    ) -> Result<VectorRecord> {
        if embedding.is_empty() {
            return Err(MirrorError::InvalidEmbedding(
                "embedding must not be empty".into(),
            ));
        }
        let key = record_key(source_type, source_id);
        let now = Utc::now();

        let mut idx = self.lock_index()?;
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut meta = write_txn.open_table(EMBEDDING_META)?;
            let stored_dim: Option<u64> = meta.get("dim")?.map(|g| g.value());
            match stored_dim {
                None => {
                    meta.insert("dim", embedding.len() as u64)?;
                }
                Some(d) if d as usize != embedding.len() => {
                    return Err(MirrorError::InvalidEmbedding(format!(
                        "embedding dimension mismatch: expected {d}, got {}",
                        embedding.len()
                    )));
                }
                Some(_) => {}
            }

            let mut records = write_txn.open_table(RECORDS)?;
            let existing: Option<VectorRecord> = match records.get(key.as_str())? {
                Some(guard) => Some(serde_json::from_str(guard.value())?),
                None => None,
            };
            let record = match existing {
                Some(prev) => VectorRecord {
                    text_chunk: text_chunk.to_string(),
                    embedding: Vec::new(),
                    metadata,
                    updated_at: now,
                    ..prev
                },
                None => VectorRecord {
                    id: RecordId::new(),
                    source_type,
                    source_id,
                    text_chunk: text_chunk.to_string(),
                    embedding: Vec::new(),
                    metadata,
                    created_at: now,
                    updated_at: now,
                },
            };
            let value = serde_json::to_string(&record)?;
            records.insert(key.as_str(), value.as_str())?;

            let bytes: Vec<u8> = embedding.iter().flat_map(|x| x.to_le_bytes()).collect();
            let mut emb = write_txn.open_table(EMBEDDINGS)?;
            emb.insert(key.as_str(), bytes.as_slice())?;
            record
        };
        write_txn.commit()?;

        // The redb tables are authoritative; a crash before this line is
        // repaired by the rebuild on next open.
        idx.insert(key, embedding.clone())?;
        drop(idx);

        Ok(VectorRecord {
            embedding,
            ..record
        })
    }

    /// Delete the record for `(source_type, source_id)`. Returns `false` if
    /// there was none.
    pub fn delete(&self, source_type: SourceType, source_id: i64) -> Result<bool> {
        let key = record_key(source_type, source_id);
        let mut idx = self.lock_index()?;
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut records = write_txn.open_table(RECORDS)?;
            let removed = records.remove(key.as_str())?.is_some();
            let mut emb = write_txn.open_table(EMBEDDINGS)?;
            emb.remove(key.as_str())?;
            removed
        };
        write_txn.commit()?;
        idx.remove(&key);
        Ok(removed)
    }

    pub fn get(&self, source_type: SourceType, source_id: i64) -> Result<Option<VectorRecord>> {
        let key = record_key(source_type, source_id);
        let idx = self.lock_index()?;
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(RECORDS)?;
        let Some(guard) = records.get(key.as_str())? else {
            return Ok(None);
        };
        let mut record: VectorRecord = serde_json::from_str(guard.value())?;
        if let Some(embedding) = idx.embedding(&key) {
            record.embedding = embedding.to_vec();
        }
        Ok(Some(record))
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock_index()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The dimension fixed by the first insert, if any.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.lock_index()?.dim())
    }

    fn check_query(idx: &VectorIndex, query: &[f32]) -> Result<()> {
        if query.is_empty() {
            return Err(MirrorError::InvalidEmbedding(
                "query embedding must not be empty".into(),
            ));
        }
        if let Some(d) = idx.dim() {
            if query.len() != d {
                return Err(MirrorError::InvalidEmbedding(format!(
                    "query dimension mismatch: index has dim {d}, query has {}",
                    query.len()
                )));
            }
        }
        Ok(())
    }

    fn load_records(&self, keys: &[String]) -> Result<HashMap<String, VectorRecord>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(RECORDS)?;
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(guard) = records.get(key.as_str())? {
                loaded.insert(key.clone(), serde_json::from_str(guard.value())?);
            }
        }
        Ok(loaded)
    }

    /// Nearest records to `query` by cosine distance, optionally restricted to
    /// one source type.
    ///
    /// Ascending distance; equal distances order by `(source_type,
    /// source_id)`. At most `limit` hits.
    pub fn search_similar(
        &self,
        query: &[f32],
        limit: usize,
        source_type: Option<SourceType>,
    ) -> Result<Vec<SimilarityHit>> {
        let idx = self.lock_index()?;
        Self::check_query(&idx, query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let prefix = source_type.map(|t| format!("{}:", t.as_str()));
        let scored = idx.nearest(query, idx.len(), |key| {
            prefix.as_deref().is_none_or(|p| key.starts_with(p))
        });

        let keys: Vec<String> = scored.iter().map(|(k, _)| k.clone()).collect();
        let mut records = self.load_records(&keys)?;
        drop(idx);
        let mut hits: Vec<SimilarityHit> = scored
            .into_iter()
            .filter_map(|(key, distance)| {
                records
                    .remove(&key)
                    .map(|record| SimilarityHit { record, distance })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| identity_cmp(&a.record, &b.record))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Keyword-gated, vector-reranked search.
    ///
    /// Only records whose text [matches](matches_keyword) `keyword` are
    /// candidates. Candidates are ordered by [`HybridParams::score`]
    /// ascending, ties by `(source_type, source_id)`.
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidArgument`] for a blank keyword,
    /// [`MirrorError::Search`] for invalid weights and
    /// [`MirrorError::InvalidEmbedding`] for a malformed query.
    pub fn hybrid_search(
        &self,
        query: &[f32],
        keyword: &str,
        limit: usize,
        params: HybridParams,
    ) -> Result<Vec<HybridHit>> {
        if keyword.trim().is_empty() {
            return Err(MirrorError::InvalidArgument(
                "hybrid search requires a non-blank keyword".into(),
            ));
        }
        params.validate()?;
        let idx = self.lock_index()?;
        Self::check_query(&idx, query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<VectorRecord> = {
            let read_txn = self.db.begin_read()?;
            let records = read_txn.open_table(RECORDS)?;
            let mut candidates = Vec::new();
            for entry in records.iter()? {
                let (_k, v) = entry?;
                let record: VectorRecord = serde_json::from_str(v.value())?;
                if matches_keyword(&record.text_chunk, keyword) {
                    candidates.push(record);
                }
            }
            candidates
        };

        let mut hits = Vec::with_capacity(candidates.len());
        for record in candidates {
            let key = record_key(record.source_type, record.source_id);
            let Some(distance) = idx.distance_to(&key, query) else {
                continue;
            };
            let rank = text_rank(&record.text_chunk, keyword);
            hits.push(HybridHit {
                score: params.score(distance, rank),
                record,
                distance,
                text_rank: rank,
            });
        }
        drop(idx);

        hits.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| identity_cmp(&a.record, &b.record))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_temp_store() -> (VectorStore, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let store = VectorStore::open(&path).unwrap();
        (store, file)
    }

    #[test]
    fn upsert_replaces_and_keeps_identity() {
        let (store, _tmp) = open_temp_store();
        let first = store
            .upsert(SourceType::Scene, 4, "rain on the pier", vec![1.0, 0.0], None)
            .unwrap();
        let second = store
            .upsert(
                SourceType::Scene,
                4,
                "sun on the pier",
                vec![0.0, 1.0],
                Some(serde_json::json!({"episode": 2})),
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.len().unwrap(), 1);

        let stored = store.get(SourceType::Scene, 4).unwrap().unwrap();
        assert_eq!(stored.text_chunk, "sun on the pier");
        assert_eq!(stored.embedding, vec![0.0, 1.0]);
        assert_eq!(stored.metadata, Some(serde_json::json!({"episode": 2})));
    }

    #[test]
    fn concurrent_upserts_keep_text_and_embedding_together() {
        let store = VectorStore::open_in_memory().unwrap();
        for _ in 0..50 {
            std::thread::scope(|s| {
                for (text, embedding) in [("alpha", [1.0f32, 0.0]), ("beta", [0.0, 1.0])] {
                    let store = &store;
                    s.spawn(move || {
                        for _ in 0..20 {
                            store
                                .upsert(SourceType::Scene, 1, text, embedding.to_vec(), None)
                                .unwrap();
                        }
                    });
                }
            });

            let stored = store.get(SourceType::Scene, 1).unwrap().unwrap();
            let expected = if stored.text_chunk == "alpha" {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            };
            assert_eq!(stored.embedding, expected);

            let top = store.search_similar(&[1.0, 0.0], 1, None).unwrap();
            let alpha_cached = top[0].distance < 0.5;
            assert_eq!(alpha_cached, top[0].record.text_chunk == "alpha");
        }
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn same_source_id_across_types_is_distinct() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .upsert(SourceType::Scene, 1, "a", vec![1.0, 0.0], None)
            .unwrap();
        store
            .upsert(SourceType::Dialogue, 1, "b", vec![1.0, 0.0], None)
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn dimension_is_fixed_by_first_insert() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .upsert(SourceType::Scene, 1, "a", vec![1.0, 0.0, 0.0], None)
            .unwrap();
        let err = store
            .upsert(SourceType::Scene, 2, "b", vec![1.0, 0.0], None)
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidEmbedding(_)));
        assert!(store.get(SourceType::Scene, 2).unwrap().is_none());

        let err = store.search_similar(&[1.0, 0.0], 5, None).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidEmbedding(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .upsert(SourceType::Episode, 9, "pilot", vec![1.0, 0.0], None)
            .unwrap();
        assert!(store.delete(SourceType::Episode, 9).unwrap());
        assert!(!store.delete(SourceType::Episode, 9).unwrap());
        assert!(store.is_empty().unwrap());
        assert!(store.search_similar(&[1.0, 0.0], 5, None).unwrap().is_empty());
    }

    #[test]
    fn store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");
        let path_str = path.to_str().unwrap();
        {
            let store = VectorStore::open(path_str).unwrap();
            store
                .upsert(SourceType::Scene, 1, "harbor", vec![1.0, 0.0], None)
                .unwrap();
        }

        let store = VectorStore::open(path_str).unwrap();
        assert_eq!(store.dimension().unwrap(), Some(2));
        let hits = store.search_similar(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text_chunk, "harbor");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn search_similar_orders_and_filters_by_type() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .upsert(SourceType::Scene, 1, "far", vec![0.0, 1.0], None)
            .unwrap();
        store
            .upsert(SourceType::Scene, 2, "near", vec![1.0, 0.1], None)
            .unwrap();
        store
            .upsert(SourceType::Dialogue, 3, "exact", vec![1.0, 0.0], None)
            .unwrap();

        let all = store.search_similar(&[1.0, 0.0], 10, None).unwrap();
        let texts: Vec<&str> = all.iter().map(|h| h.record.text_chunk.as_str()).collect();
        assert_eq!(texts, vec!["exact", "near", "far"]);

        let scenes = store
            .search_similar(&[1.0, 0.0], 10, Some(SourceType::Scene))
            .unwrap();
        let texts: Vec<&str> = scenes.iter().map(|h| h.record.text_chunk.as_str()).collect();
        assert_eq!(texts, vec!["near", "far"]);
    }

    #[test]
    fn equal_distances_break_ties_by_identity() {
        let store = VectorStore::open_in_memory().unwrap();
        for id in [10, 2, 1] {
            store
                .upsert(SourceType::Scene, id, "same", vec![1.0, 0.0], None)
                .unwrap();
        }
        let hits = store.search_similar(&[1.0, 0.0], 10, None).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.record.source_id).collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[test]
    fn hybrid_search_requires_keyword_match() {
        let store = VectorStore::open_in_memory().unwrap();
        store
            .upsert(SourceType::Scene, 1, "a storm rolls in", vec![0.0, 1.0], None)
            .unwrap();
        store
            .upsert(SourceType::Scene, 2, "Stormy seas", vec![0.5, 0.5], None)
            .unwrap();
        store
            .upsert(SourceType::Scene, 3, "calm harbor", vec![1.0, 0.0], None)
            .unwrap();

        let hits = store
            .hybrid_search(&[1.0, 0.0], "storm", 10, HybridParams::default())
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.record.source_id).collect();
        assert_eq!(hits.len(), 2);
        assert!(!ids.contains(&3), "non-matching record must be excluded");
    }

    #[test]
    fn hybrid_search_prefers_lexical_rank_over_raw_similarity() {
        let store = VectorStore::open_in_memory().unwrap();
        // distance 0.1 to the query, rank 1/3
        store
            .upsert(SourceType::Dialogue, 1, "stormy", vec![0.9, 0.435_889_9], None)
            .unwrap();
        // distance 0.3 to the query, rank 0.9
        store
            .upsert(
                SourceType::Dialogue,
                2,
                "storm storm storm storm storm storm storm storm storm",
                vec![0.7, 0.714_142_8],
                None,
            )
            .unwrap();

        let hits = store
            .hybrid_search(&[1.0, 0.0], "storm", 10, HybridParams::default())
            .unwrap();
        assert_eq!(hits[0].record.source_id, 2);
        assert!((hits[0].score - 0.24).abs() < 1e-3);
        assert!((hits[1].score - 0.27).abs() < 1e-3);
    }

    #[test]
    fn hybrid_search_rejects_blank_keyword() {
        let store = VectorStore::open_in_memory().unwrap();
        let err = store
            .hybrid_search(&[1.0, 0.0], "   ", 10, HybridParams::default())
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidArgument(_)));
    }

    #[test]
    fn hybrid_params_validation() {
        let zero = HybridParams {
            vector_weight: 0.0,
            keyword_weight: 0.0,
        };
        assert!(matches!(zero.validate(), Err(MirrorError::Search(_))));
        let negative = HybridParams {
            vector_weight: -0.1,
            keyword_weight: 1.0,
        };
        assert!(negative.validate().is_err());
        assert!(HybridParams::default().validate().is_ok());
    }

    #[test]
    fn default_weights_rank_close_lexical_hit_first() {
        let params = HybridParams::default();
        let r1 = params.score(0.1, 0.2);
        let r2 = params.score(0.3, 0.9);
        assert!((r1 - 0.31).abs() < 1e-6);
        assert!((r2 - 0.24).abs() < 1e-6);
        assert!(r2 < r1);
    }

    #[test]
    fn text_rank_counts_exact_and_partial_tokens() {
        assert_eq!(text_rank("calm harbor", "storm"), 0.0);
        assert!((text_rank("Storm!", "storm") - 0.5).abs() < 1e-6);
        assert!((text_rank("stormy", "storm") - 1.0 / 3.0).abs() < 1e-6);
        assert!((text_rank("storm, then storm", "STORM") - 2.0 / 3.0).abs() < 1e-6);
        assert!((text_rank("the old pier at dusk", "old pier") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn matches_keyword_is_case_insensitive_containment() {
        assert!(matches_keyword("Thunderstorm", "STORM"));
        assert!(!matches_keyword("calm", "storm"));
        assert!(!matches_keyword("anything", " "));
    }

    #[test]
    fn source_type_parses_its_own_name() {
        for t in [
            SourceType::Dialogue,
            SourceType::Scene,
            SourceType::Episode,
            SourceType::Character,
            SourceType::Concept,
        ] {
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
        }
        assert!("chapter".parse::<SourceType>().is_err());
    }
}
