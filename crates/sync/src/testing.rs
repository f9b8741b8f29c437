//! Fixtures shared by the unit tests of this crate.

use crate::records::{CharacterRecord, RelationshipRecord};
use castgraph::{
    EdgeSpec, GraphEdge, GraphMirror, GraphMirrorStore, GraphNode, MirrorError, NodeId, NodeKind,
    RankedNode, ReachedNode, Result, SourceRecord,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub(crate) const PROJECT: i64 = 10;

pub(crate) fn relationship(
    id: i64,
    episode_id: i64,
    from: (i64, &str),
    to: (i64, &str),
    relation_type: &str,
    closeness: f64,
) -> RelationshipRecord {
    RelationshipRecord {
        id,
        episode_id,
        from: CharacterRecord::new(from.0, PROJECT, from.1),
        to: CharacterRecord::new(to.0, PROJECT, to.1),
        relation_type: relation_type.to_string(),
        closeness,
        description: None,
    }
}

/// An in-memory mirror that fails on demand.
pub(crate) struct FlakyStore {
    inner: GraphMirror,
    failing_nodes: Mutex<HashSet<i64>>,
    failing_edges: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: GraphMirror::open_in_memory().unwrap(),
            failing_nodes: Mutex::new(HashSet::new()),
            failing_edges: AtomicBool::new(false),
        }
    }

    pub(crate) fn inner(&self) -> &GraphMirror {
        &self.inner
    }

    /// Make every write for this source id fail.
    pub(crate) fn fail_node(&self, source_id: i64) {
        self.failing_nodes.lock().unwrap().insert(source_id);
    }

    pub(crate) fn fail_edges(&self, fail: bool) {
        self.failing_edges.store(fail, Ordering::SeqCst);
    }

    fn check_node(&self, source_id: i64) -> Result<()> {
        if self.failing_nodes.lock().unwrap().contains(&source_id) {
            return Err(MirrorError::Storage(format!(
                "injected failure for {source_id}"
            )));
        }
        Ok(())
    }

    fn check_edges(&self) -> Result<()> {
        if self.failing_edges.load(Ordering::SeqCst) {
            return Err(MirrorError::Storage("injected edge failure".into()));
        }
        Ok(())
    }
}

impl GraphMirrorStore for FlakyStore {
    fn upsert_node(&self, kind: NodeKind, record: &SourceRecord) -> Result<GraphNode> {
        self.check_node(record.source_id)?;
        self.inner.upsert_node(kind, record)
    }
    fn node_by_source(&self, kind: NodeKind, source_id: i64) -> Result<Option<GraphNode>> {
        self.inner.node_by_source(kind, source_id)
    }
    fn delete_node(&self, kind: NodeKind, source_id: i64) -> Result<bool> {
        self.check_node(source_id)?;
        self.inner.delete_node(kind, source_id)
    }
    fn replace_edge(&self, from: &NodeId, to: &NodeId, spec: &EdgeSpec) -> Result<GraphEdge> {
        self.check_edges()?;
        self.inner.replace_edge(from, to, spec)
    }
    fn remove_edge(&self, from: &NodeId, to: &NodeId, episode_id: Option<i64>) -> Result<bool> {
        self.check_edges()?;
        self.inner.remove_edge(from, to, episode_id)
    }
    fn neighbors_within(
        &self,
        start: &NodeId,
        project_id: i64,
        max_depth: usize,
    ) -> Result<Vec<ReachedNode>> {
        self.inner.neighbors_within(start, project_id, max_depth)
    }
    fn shortest_path(
        &self,
        from: &NodeId,
        to: &NodeId,
        project_id: i64,
    ) -> Result<Option<Vec<GraphNode>>> {
        self.inner.shortest_path(from, to, project_id)
    }
    fn related_by_type(
        &self,
        start: &NodeId,
        project_id: i64,
        relation_type: &str,
    ) -> Result<Vec<GraphNode>> {
        self.inner.related_by_type(start, project_id, relation_type)
    }
    fn most_connected(
        &self,
        project_id: i64,
        kind: NodeKind,
        limit: usize,
    ) -> Result<Vec<RankedNode>> {
        self.inner.most_connected(project_id, kind, limit)
    }
}
