//! Castgraph: embedded graph mirror and vector similarity store for
//! character/relationship authoring data.
//!
//! The relational store stays authoritative. This crate keeps two secondary,
//! query-optimised copies of it:
//!
//! - a **graph mirror** ([`GraphMirror`]) of characters and concepts
//!   ([`GraphNode`]) joined by episode-scoped relationships ([`GraphEdge`]),
//!   supporting bounded traversal, shortest path, relation-type filtering and
//!   degree ranking, always scoped to one project;
//! - a **vector store** ([`VectorStore`]) of text chunks and their embeddings
//!   ([`VectorRecord`]), supporting nearest-neighbour and hybrid
//!   (vector + keyword) search.
//!
//! Both stores identify records by their relational source id, so every write
//! is an idempotent upsert.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use castgraph::{EdgeSpec, GraphMirror, NodeKind, SourceRecord};
//!
//! let mirror = GraphMirror::open("story.castgraph").unwrap();
//!
//! let ava = mirror
//!     .upsert_node(NodeKind::Character, &SourceRecord::new(1, 10, "Ava"))
//!     .unwrap();
//! let ben = mirror
//!     .upsert_node(NodeKind::Character, &SourceRecord::new(2, 10, "Ben"))
//!     .unwrap();
//!
//! mirror
//!     .replace_edge(&ava.id, &ben.id, &EdgeSpec::episode(3, "friend", 4.0))
//!     .unwrap();
//!
//! let reached = mirror.neighbors_within(&ava.id, 10, 2).unwrap();
//! assert_eq!(reached.len(), 1);
//! ```

mod traversal;
mod vector;
mod vector_store;

pub use traversal::{RankedNode, ReachedNode};
pub use vector::cosine_distance;
pub use vector_store::{
    matches_keyword, text_rank, HybridHit, HybridParams, RecordId, SimilarityHit, SourceType,
    VectorRecord, VectorStore,
};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<redb::DatabaseError> for MirrorError {
    fn from(e: redb::DatabaseError) -> Self {
        MirrorError::Storage(e.to_string())
    }
}
impl From<redb::TransactionError> for MirrorError {
    fn from(e: redb::TransactionError) -> Self {
        MirrorError::Storage(e.to_string())
    }
}
impl From<redb::TableError> for MirrorError {
    fn from(e: redb::TableError) -> Self {
        MirrorError::Storage(e.to_string())
    }
}
impl From<redb::StorageError> for MirrorError {
    fn from(e: redb::StorageError) -> Self {
        MirrorError::Storage(e.to_string())
    }
}
impl From<redb::CommitError> for MirrorError {
    fn from(e: redb::CommitError) -> Self {
        MirrorError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Mirror-store identity of a [`GraphNode`]. Opaque to callers; the join key
/// back to the relational store is [`GraphNode::source_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a mirrored node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A character record.
    Character,
    /// An abstract concept: theme, emotion, event, setting or trait.
    Concept,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Character => "character",
            NodeKind::Concept => "concept",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The relational fields a node is built from.
///
/// Every sync supplies the complete field set; the mirror overwrites what it
/// holds rather than merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Relational primary key.
    pub source_id: i64,
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Character role or concept category.
    pub node_type: Option<String>,
    pub importance: Option<i32>,
}

impl SourceRecord {
    pub fn new(source_id: i64, project_id: i64, name: impl Into<String>) -> Self {
        Self {
            source_id,
            project_id,
            name: name.into(),
            description: None,
            node_type: None,
            importance: None,
        }
    }
}

/// A character or concept mirrored from the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    /// Relational primary key; unique per [`NodeKind`].
    pub source_id: i64,
    pub project_id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<String>,
    pub importance: Option<i32>,
    /// When the last successful sync wrote this node.
    pub synced_at: DateTime<Utc>,
}

impl GraphNode {
    fn from_source(kind: NodeKind, record: &SourceRecord) -> Self {
        Self {
            id: NodeId::new(),
            source_id: record.source_id,
            project_id: record.project_id,
            kind,
            name: record.name.clone(),
            description: record.description.clone(),
            node_type: record.node_type.clone(),
            importance: record.importance,
            synced_at: Utc::now(),
        }
    }

    /// Overwrite every mutable field from `record`, keeping identity.
    fn overwrite_from(&mut self, record: &SourceRecord) {
        self.project_id = record.project_id;
        self.name = record.name.clone();
        self.description = record.description.clone();
        self.node_type = record.node_type.clone();
        self.importance = record.importance;
        self.synced_at = Utc::now();
    }
}

/// Full state of one edge write. Callers always supply every field.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    /// Episode the relationship belongs to. `None` for explicit concept links.
    pub episode_id: Option<i64>,
    /// Relational row that owns the edge. A later write for the same row
    /// replaces its previous edge even if the episode or endpoints changed.
    pub relationship_id: Option<i64>,
    pub relation_type: String,
    pub weight: f64,
    pub description: Option<String>,
}

impl EdgeSpec {
    /// An episode-scoped relationship with the given closeness.
    pub fn episode(episode_id: i64, relation_type: impl Into<String>, closeness: f64) -> Self {
        Self {
            episode_id: Some(episode_id),
            relationship_id: None,
            relation_type: relation_type.into(),
            weight: closeness,
            description: None,
        }
    }

    /// An unscoped link between two concepts with the given similarity.
    pub fn link(relation_type: impl Into<String>, similarity: f64) -> Self {
        Self {
            episode_id: None,
            relationship_id: None,
            relation_type: relation_type.into(),
            weight: similarity,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_relationship(mut self, relationship_id: i64) -> Self {
        self.relationship_id = Some(relationship_id);
        self
    }
}

/// A directed relationship between two nodes, scoped to one episode.
///
/// The edge row is owned by the outgoing index of `from`; `to` is only a
/// reference (the incoming index stores keys, not rows).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub episode_id: Option<i64>,
    #[serde(default)]
    pub relationship_id: Option<i64>,
    /// Project of the `from` node. Rewritten when that node moves project.
    pub project_id: i64,
    pub relation_type: String,
    /// Closeness for episode relationships, similarity for concept links.
    pub weight: f64,
    pub description: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Row counts, used for operator summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub characters: usize,
    pub concepts: usize,
    pub edges: usize,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Node rows keyed by [`NodeId`].
const NODES: TableDefinition<&str, &str> = TableDefinition::new("nodes");
/// `"{kind}:{source_id}"` → node id. Enforces one node per `(kind, source_id)`.
const NODE_KEYS: TableDefinition<&str, &str> = TableDefinition::new("node_keys");
/// Edge rows keyed `"{from}/{scope}/{to}"`, where scope is the episode id or `-`.
///
/// A prefix scan on `"{from}/"` lists a node's outgoing edges and one on
/// `"{from}/{scope}/"` its edges within one episode.
const EDGES_OUT: TableDefinition<&str, &str> = TableDefinition::new("edges_out");
/// Incoming index keyed `"{to}/{from}/{scope}"`. Holds no payload.
const EDGES_IN: TableDefinition<&str, ()> = TableDefinition::new("edges_in");
/// Relationship id → `EDGES_OUT` key of the edge it currently owns.
const EDGE_SOURCES: TableDefinition<i64, &str> = TableDefinition::new("edge_sources");

fn node_key(kind: NodeKind, source_id: i64) -> String {
    format!("{}:{}", kind.as_str(), source_id)
}

fn edge_scope(episode_id: Option<i64>) -> String {
    match episode_id {
        Some(id) => id.to_string(),
        None => "-".to_string(),
    }
}

fn out_key(from: &NodeId, scope: &str, to: &NodeId) -> String {
    format!("{from}/{scope}/{to}")
}

fn in_key(to: &NodeId, from: &NodeId, scope: &str) -> String {
    format!("{to}/{from}/{scope}")
}

/// Remove the edge row at `key` with its incoming entry and, if the row
/// still owns it, its relationship mapping.
fn unlink_edge(
    out: &mut Table<'_, &'static str, &'static str>,
    incoming: &mut Table<'_, &'static str, ()>,
    sources: &mut Table<'_, i64, &'static str>,
    key: &str,
) -> Result<Option<GraphEdge>> {
    let Some(value) = out.remove(key)?.map(|g| g.value().to_string()) else {
        return Ok(None);
    };
    let edge: GraphEdge = serde_json::from_str(&value)?;
    incoming.remove(in_key(&edge.to, &edge.from, &edge_scope(edge.episode_id)).as_str())?;
    if let Some(rid) = edge.relationship_id {
        let owned = sources.get(rid)?.is_some_and(|g| g.value() == key);
        if owned {
            sources.remove(rid)?;
        }
    }
    Ok(Some(edge))
}

/// Collect `(key, value)` pairs whose key starts with `prefix`.
pub(crate) fn scan_prefix<T>(table: &T, prefix: &str) -> Result<Vec<(String, String)>>
where
    T: ReadableTable<&'static str, &'static str>,
{
    let mut rows = Vec::new();
    for entry in table.range(prefix..)? {
        let (k, v) = entry?;
        let key = k.value();
        if !key.starts_with(prefix) {
            break;
        }
        rows.push((key.to_string(), v.value().to_string()));
    }
    Ok(rows)
}

/// Collect keys of the incoming index that start with `prefix`.
pub(crate) fn scan_in_keys<T>(table: &T, prefix: &str) -> Result<Vec<String>>
where
    T: ReadableTable<&'static str, ()>,
{
    let mut keys = Vec::new();
    for entry in table.range(prefix..)? {
        let (k, _) = entry?;
        let key = k.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

/// Castgraph graph mirror.
///
/// An embedded store (backed by `redb`) holding one node per relational
/// record and one edge per `(from, to, episode)` triple. Every public write is
/// a single ACID transaction, so concurrent writers to the same record resolve
/// last-write-wins without tearing a row.
///
/// # Example
///
/// ```rust,no_run
/// use castgraph::{GraphMirror, NodeKind, SourceRecord};
///
/// let mirror = GraphMirror::open("story.castgraph").unwrap();
/// mirror.upsert_node(NodeKind::Character, &SourceRecord::new(7, 1, "Mara")).unwrap();
/// mirror.upsert_node(NodeKind::Character, &SourceRecord::new(7, 1, "Mara Vey")).unwrap();
/// let node = mirror.node_by_source(NodeKind::Character, 7).unwrap().unwrap();
/// assert_eq!(node.name, "Mara Vey");
/// ```
pub struct GraphMirror {
    db: Database,
}

impl GraphMirror {
    /// Open or create a graph mirror at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create an in-memory graph mirror (no file I/O).
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(NODES)?;
            write_txn.open_table(NODE_KEYS)?;
            write_txn.open_table(EDGES_OUT)?;
            write_txn.open_table(EDGES_IN)?;
            write_txn.open_table(EDGE_SOURCES)?;
            write_txn.commit()?;
        }
        Ok(Self { db })
    }

    /// Insert or update the node for `(kind, record.source_id)`.
    ///
    /// If the node exists its mutable fields are overwritten in place and its
    /// [`NodeId`] is kept; otherwise a new node is created. Applying the same
    /// record twice leaves exactly one node. A node that changes project
    /// takes its outgoing edges along in the same transaction.
    pub fn upsert_node(&self, kind: NodeKind, record: &SourceRecord) -> Result<GraphNode> {
        let key = node_key(kind, record.source_id);
        let write_txn = self.db.begin_write()?;
        let node = {
            let mut keys = write_txn.open_table(NODE_KEYS)?;
            let mut nodes = write_txn.open_table(NODES)?;

            let existing_id: Option<String> =
                keys.get(key.as_str())?.map(|g| g.value().to_string());
            let existing: Option<GraphNode> = match &existing_id {
                Some(id) => match nodes.get(id.as_str())? {
                    Some(guard) => Some(serde_json::from_str(guard.value())?),
                    None => None,
                },
                None => None,
            };

            let moved = existing
                .as_ref()
                .is_some_and(|n| n.project_id != record.project_id);
            let node = match existing {
                Some(mut node) => {
                    node.overwrite_from(record);
                    node
                }
                None => GraphNode::from_source(kind, record),
            };

            let value = serde_json::to_string(&node)?;
            nodes.insert(node.id.0.as_str(), value.as_str())?;
            keys.insert(key.as_str(), node.id.0.as_str())?;

            if moved {
                let mut out = write_txn.open_table(EDGES_OUT)?;
                for (k, v) in scan_prefix(&out, &format!("{}/", node.id))? {
                    let mut edge: GraphEdge = serde_json::from_str(&v)?;
                    edge.project_id = node.project_id;
                    let value = serde_json::to_string(&edge)?;
                    out.insert(k.as_str(), value.as_str())?;
                }
            }
            node
        };
        write_txn.commit()?;
        Ok(node)
    }

    /// Look up a node by its relational identity.
    pub fn node_by_source(&self, kind: NodeKind, source_id: i64) -> Result<Option<GraphNode>> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(NODE_KEYS)?;
        let nodes = read_txn.open_table(NODES)?;
        let Some(id) = keys
            .get(node_key(kind, source_id).as_str())?
            .map(|g| g.value().to_string())
        else {
            return Ok(None);
        };
        match nodes.get(id.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a node by its mirror identity.
    pub fn node(&self, id: &NodeId) -> Result<Option<GraphNode>> {
        let read_txn = self.db.begin_read()?;
        let nodes = read_txn.open_table(NODES)?;
        match nodes.get(id.0.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Delete the node for `(kind, source_id)` together with every edge that
    /// touches it.
    ///
    /// Returns `false` (and changes nothing) if no such node exists.
    pub fn delete_node(&self, kind: NodeKind, source_id: i64) -> Result<bool> {
        let key = node_key(kind, source_id);
        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(NODE_KEYS)?;
            let Some(id) = keys.remove(key.as_str())?.map(|g| g.value().to_string()) else {
                return Ok(false);
            };
            let id = NodeId(id);

            let mut nodes = write_txn.open_table(NODES)?;
            let mut out = write_txn.open_table(EDGES_OUT)?;
            let mut incoming = write_txn.open_table(EDGES_IN)?;
            let mut sources = write_txn.open_table(EDGE_SOURCES)?;

            // Outgoing edges are owned by this node.
            for (k, _) in scan_prefix(&out, &format!("{id}/"))? {
                unlink_edge(&mut out, &mut incoming, &mut sources, &k)?;
            }

            // Incoming edges are owned by their source nodes.
            for k in scan_in_keys(&incoming, &format!("{id}/"))? {
                if let Some((from, scope)) = split_in_key(&k) {
                    let key = out_key(&from, &scope, &id);
                    unlink_edge(&mut out, &mut incoming, &mut sources, &key)?;
                }
                incoming.remove(k.as_str())?;
            }

            nodes.remove(id.0.as_str())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    /// Replace the edge `(from, to, spec.episode_id)` with `spec`.
    ///
    /// Any prior edge for the same triple is removed in the same transaction,
    /// so a re-sync never duplicates. When `spec.relationship_id` is set, the
    /// edge that relationship wrote last is removed too, wherever it was.
    /// Both endpoints must exist.
    pub fn replace_edge(&self, from: &NodeId, to: &NodeId, spec: &EdgeSpec) -> Result<GraphEdge> {
        let scope = edge_scope(spec.episode_id);
        let write_txn = self.db.begin_write()?;
        let edge = {
            let nodes = write_txn.open_table(NODES)?;
            let from_node: GraphNode = match nodes.get(from.0.as_str())? {
                Some(guard) => serde_json::from_str(guard.value())?,
                None => return Err(MirrorError::NotFound(format!("node {from}"))),
            };
            if nodes.get(to.0.as_str())?.is_none() {
                return Err(MirrorError::NotFound(format!("node {to}")));
            }
            drop(nodes);

            let edge = GraphEdge {
                from: from.clone(),
                to: to.clone(),
                episode_id: spec.episode_id,
                relationship_id: spec.relationship_id,
                project_id: from_node.project_id,
                relation_type: spec.relation_type.clone(),
                weight: spec.weight,
                description: spec.description.clone(),
                synced_at: Utc::now(),
            };

            let key = out_key(from, &scope, to);
            let value = serde_json::to_string(&edge)?;
            let mut out = write_txn.open_table(EDGES_OUT)?;
            let mut incoming = write_txn.open_table(EDGES_IN)?;
            let mut sources = write_txn.open_table(EDGE_SOURCES)?;

            if let Some(rid) = spec.relationship_id {
                let prior: Option<String> = sources.get(rid)?.map(|g| g.value().to_string());
                if let Some(prior) = prior.filter(|p| *p != key) {
                    unlink_edge(&mut out, &mut incoming, &mut sources, &prior)?;
                }
            }
            unlink_edge(&mut out, &mut incoming, &mut sources, &key)?;

            out.insert(key.as_str(), value.as_str())?;
            incoming.insert(in_key(to, from, &scope).as_str(), ())?;
            if let Some(rid) = spec.relationship_id {
                sources.insert(rid, key.as_str())?;
            }
            edge
        };
        write_txn.commit()?;
        Ok(edge)
    }

    /// Remove the edge `(from, to, episode_id)`. Returns `false` if absent.
    pub fn remove_edge(&self, from: &NodeId, to: &NodeId, episode_id: Option<i64>) -> Result<bool> {
        let scope = edge_scope(episode_id);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut out = write_txn.open_table(EDGES_OUT)?;
            let mut incoming = write_txn.open_table(EDGES_IN)?;
            let mut sources = write_txn.open_table(EDGE_SOURCES)?;
            let key = out_key(from, &scope, to);
            let removed = unlink_edge(&mut out, &mut incoming, &mut sources, &key)?.is_some();
            incoming.remove(in_key(to, from, &scope).as_str())?;
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Every edge owned by `from`, across all episodes.
    pub fn edges_from(&self, from: &NodeId) -> Result<Vec<GraphEdge>> {
        let read_txn = self.db.begin_read()?;
        let out = read_txn.open_table(EDGES_OUT)?;
        scan_prefix(&out, &format!("{from}/"))?
            .into_iter()
            .map(|(_, v)| Ok(serde_json::from_str(&v)?))
            .collect()
    }

    /// Edges owned by `from` within one episode.
    pub fn edges_in_episode(&self, from: &NodeId, episode_id: i64) -> Result<Vec<GraphEdge>> {
        let read_txn = self.db.begin_read()?;
        let out = read_txn.open_table(EDGES_OUT)?;
        scan_prefix(&out, &format!("{from}/{}/", edge_scope(Some(episode_id))))?
            .into_iter()
            .map(|(_, v)| Ok(serde_json::from_str(&v)?))
            .collect()
    }

    /// Every edge pointing at `to`.
    pub fn edges_to(&self, to: &NodeId) -> Result<Vec<GraphEdge>> {
        let read_txn = self.db.begin_read()?;
        let out = read_txn.open_table(EDGES_OUT)?;
        let incoming = read_txn.open_table(EDGES_IN)?;
        let mut edges = Vec::new();
        for k in scan_in_keys(&incoming, &format!("{to}/"))? {
            let Some((from, scope)) = split_in_key(&k) else {
                continue;
            };
            if let Some(guard) = out.get(out_key(&from, &scope, to).as_str())? {
                edges.push(serde_json::from_str(guard.value())?);
            }
        }
        Ok(edges)
    }

    /// All nodes of one project, optionally restricted to one kind.
    pub fn nodes_in_project(&self, project_id: i64, kind: Option<NodeKind>) -> Result<Vec<GraphNode>> {
        let read_txn = self.db.begin_read()?;
        let nodes = read_txn.open_table(NODES)?;
        let mut results = Vec::new();
        for entry in nodes.iter()? {
            let (_k, v) = entry?;
            let node: GraphNode = serde_json::from_str(v.value())?;
            if node.project_id == project_id && kind.is_none_or(|k| node.kind == k) {
                results.push(node);
            }
        }
        Ok(results)
    }

    /// Row counts across the whole mirror.
    pub fn stats(&self) -> Result<MirrorStats> {
        let read_txn = self.db.begin_read()?;
        let nodes = read_txn.open_table(NODES)?;
        let out = read_txn.open_table(EDGES_OUT)?;
        let mut stats = MirrorStats::default();
        for entry in nodes.iter()? {
            let (_k, v) = entry?;
            let node: GraphNode = serde_json::from_str(v.value())?;
            match node.kind {
                NodeKind::Character => stats.characters += 1,
                NodeKind::Concept => stats.concepts += 1,
            }
        }
        for entry in out.iter()? {
            entry?;
            stats.edges += 1;
        }
        Ok(stats)
    }
}

/// Split an incoming-index key `"{to}/{from}/{scope}"` into `(from, scope)`.
fn split_in_key(key: &str) -> Option<(NodeId, String)> {
    let mut parts = key.splitn(3, '/');
    let _to = parts.next()?;
    let from = parts.next()?;
    let scope = parts.next()?;
    Some((NodeId(from.to_string()), scope.to_string()))
}

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

/// The operations the sync and query layers need from a graph mirror.
///
/// [`GraphMirror`] is the embedded implementation. Every read is scoped by
/// `project_id`; traversals only visit nodes of the start node's kind.
pub trait GraphMirrorStore: Send + Sync {
    fn upsert_node(&self, kind: NodeKind, record: &SourceRecord) -> Result<GraphNode>;
    fn node_by_source(&self, kind: NodeKind, source_id: i64) -> Result<Option<GraphNode>>;
    fn delete_node(&self, kind: NodeKind, source_id: i64) -> Result<bool>;
    fn replace_edge(&self, from: &NodeId, to: &NodeId, spec: &EdgeSpec) -> Result<GraphEdge>;
    fn remove_edge(&self, from: &NodeId, to: &NodeId, episode_id: Option<i64>) -> Result<bool>;
    fn neighbors_within(
        &self,
        start: &NodeId,
        project_id: i64,
        max_depth: usize,
    ) -> Result<Vec<ReachedNode>>;
    fn shortest_path(
        &self,
        from: &NodeId,
        to: &NodeId,
        project_id: i64,
    ) -> Result<Option<Vec<GraphNode>>>;
    fn related_by_type(
        &self,
        start: &NodeId,
        project_id: i64,
        relation_type: &str,
    ) -> Result<Vec<GraphNode>>;
    fn most_connected(&self, project_id: i64, kind: NodeKind, limit: usize)
        -> Result<Vec<RankedNode>>;
}

impl GraphMirrorStore for GraphMirror {
    fn upsert_node(&self, kind: NodeKind, record: &SourceRecord) -> Result<GraphNode> {
        GraphMirror::upsert_node(self, kind, record)
    }
    fn node_by_source(&self, kind: NodeKind, source_id: i64) -> Result<Option<GraphNode>> {
        GraphMirror::node_by_source(self, kind, source_id)
    }
    fn delete_node(&self, kind: NodeKind, source_id: i64) -> Result<bool> {
        GraphMirror::delete_node(self, kind, source_id)
    }
    fn replace_edge(&self, from: &NodeId, to: &NodeId, spec: &EdgeSpec) -> Result<GraphEdge> {
        GraphMirror::replace_edge(self, from, to, spec)
    }
    fn remove_edge(&self, from: &NodeId, to: &NodeId, episode_id: Option<i64>) -> Result<bool> {
        GraphMirror::remove_edge(self, from, to, episode_id)
    }
    fn neighbors_within(
        &self,
        start: &NodeId,
        project_id: i64,
        max_depth: usize,
    ) -> Result<Vec<ReachedNode>> {
        GraphMirror::neighbors_within(self, start, project_id, max_depth)
    }
    fn shortest_path(
        &self,
        from: &NodeId,
        to: &NodeId,
        project_id: i64,
    ) -> Result<Option<Vec<GraphNode>>> {
        GraphMirror::shortest_path(self, from, to, project_id)
    }
    fn related_by_type(
        &self,
        start: &NodeId,
        project_id: i64,
        relation_type: &str,
    ) -> Result<Vec<GraphNode>> {
        GraphMirror::related_by_type(self, start, project_id, relation_type)
    }
    fn most_connected(
        &self,
        project_id: i64,
        kind: NodeKind,
        limit: usize,
    ) -> Result<Vec<RankedNode>> {
        GraphMirror::most_connected(self, project_id, kind, limit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
