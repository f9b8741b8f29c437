//! Best-effort sync of relational writes into the graph mirror.

use crate::error::SyncError;
use crate::records::{CharacterRecord, RelationshipRecord};
use castgraph::{EdgeSpec, GraphEdge, GraphMirrorStore, GraphNode, NodeKind, SourceRecord};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of a best-effort sync step.
///
/// `Ignored` means the mirror was not updated and now lags the relational
/// store until the next successful sync of the same entity or a bulk
/// migration. It is never an error for the relational caller.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum SyncOutcome<T> {
    Applied(T),
    Ignored(SyncWarning),
}

impl<T> SyncOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            SyncOutcome::Applied(v) => Some(v),
            SyncOutcome::Ignored(_) => None,
        }
    }

    pub fn warning(&self) -> Option<&SyncWarning> {
        match self {
            SyncOutcome::Applied(_) => None,
            SyncOutcome::Ignored(w) => Some(w),
        }
    }
}

/// What was swallowed, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncWarning {
    pub operation: &'static str,
    pub entity: String,
    pub error: String,
}

/// Log a swallowed failure and turn it into an ignored outcome.
pub(crate) fn ignored<T>(
    operation: &'static str,
    entity: impl Into<String>,
    err: impl Display,
) -> SyncOutcome<T> {
    let entity = entity.into();
    let error = err.to_string();
    warn!(operation, entity = %entity, error = %error, "graph sync skipped; mirror may lag");
    SyncOutcome::Ignored(SyncWarning {
        operation,
        entity,
        error,
    })
}

/// Keeps the graph mirror consistent with relational character and
/// relationship writes.
///
/// Cheap to clone; clones share the underlying store.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn GraphMirrorStore>,
}

impl SyncService {
    pub fn new(store: Arc<dyn GraphMirrorStore>) -> Self {
        Self { store }
    }

    pub(crate) fn store(&self) -> &dyn GraphMirrorStore {
        self.store.as_ref()
    }

    /// Idempotently upsert the node for `(kind, record.source_id)`.
    pub fn sync_node(&self, kind: NodeKind, record: &SourceRecord) -> SyncOutcome<GraphNode> {
        match self.store.upsert_node(kind, record) {
            Ok(node) => {
                debug!(%kind, source_id = record.source_id, node_id = %node.id, "node synced");
                SyncOutcome::Applied(node)
            }
            Err(e) => ignored("sync_node", format!("{kind} {}", record.source_id), e),
        }
    }

    pub fn sync_character(&self, character: &CharacterRecord) -> SyncOutcome<GraphNode> {
        self.sync_node(NodeKind::Character, &character.to_source())
    }

    /// Sync both endpoint characters, then replace the `(from, to, episode)`
    /// edge. An edge written earlier for the same relationship row is dropped
    /// in the same transaction, so episode or endpoint changes never leave
    /// the old edge behind.
    ///
    /// The endpoints are synced concurrently and both finish before the edge
    /// write starts. A failed endpoint sync yields `Ignored`; a failed edge
    /// write is returned as [`SyncError::EdgeWrite`].
    pub fn sync_edge(
        &self,
        relationship: &RelationshipRecord,
    ) -> Result<SyncOutcome<GraphEdge>, SyncError> {
        let label = relationship.label();
        let (from, to) = std::thread::scope(|s| {
            let from = s.spawn(|| self.sync_character(&relationship.from));
            let to = self.sync_character(&relationship.to);
            let from = from
                .join()
                .unwrap_or_else(|_| ignored("sync_node", label.as_str(), "endpoint sync panicked"));
            (from, to)
        });

        let (from, to) = match (from, to) {
            (SyncOutcome::Applied(from), SyncOutcome::Applied(to)) => (from, to),
            (SyncOutcome::Ignored(w), _) | (_, SyncOutcome::Ignored(w)) => {
                return Ok(ignored(
                    "sync_edge",
                    label,
                    format_args!("endpoint not synced: {}", w.error),
                ));
            }
        };

        let mut spec = EdgeSpec::episode(
            relationship.episode_id,
            relationship.relation_type.as_str(),
            relationship.closeness,
        )
        .with_relationship(relationship.id);
        spec.description = relationship.description.clone();

        match self.store.replace_edge(&from.id, &to.id, &spec) {
            Ok(edge) => {
                debug!(
                    relationship_id = relationship.id,
                    episode_id = relationship.episode_id,
                    relation_type = %edge.relation_type,
                    "edge synced"
                );
                Ok(SyncOutcome::Applied(edge))
            }
            Err(e) => {
                error!(entity = %label, error = %e, "edge write failed");
                Err(SyncError::EdgeWrite {
                    entity: label,
                    source: e,
                })
            }
        }
    }

    /// Delete the node for `(kind, source_id)` and its incident edges.
    /// `Applied(false)` when there was nothing to delete.
    pub fn delete_node(&self, kind: NodeKind, source_id: i64) -> SyncOutcome<bool> {
        match self.store.delete_node(kind, source_id) {
            Ok(removed) => {
                debug!(%kind, source_id, removed, "node delete synced");
                SyncOutcome::Applied(removed)
            }
            Err(e) => ignored("delete_node", format!("{kind} {source_id}"), e),
        }
    }

    pub fn delete_character(&self, source_id: i64) -> SyncOutcome<bool> {
        self.delete_node(NodeKind::Character, source_id)
    }

    /// Remove the edge between two characters within one episode.
    /// `Applied(false)` when either endpoint or the edge is absent.
    pub fn delete_edge(
        &self,
        episode_id: i64,
        from_source_id: i64,
        to_source_id: i64,
    ) -> SyncOutcome<bool> {
        let entity = format!("edge {from_source_id} -> {to_source_id} (episode {episode_id})");
        let lookup = |id| self.store.node_by_source(NodeKind::Character, id);
        let endpoints = match (lookup(from_source_id), lookup(to_source_id)) {
            (Ok(from), Ok(to)) => from.zip(to),
            (Err(e), _) | (_, Err(e)) => return ignored("delete_edge", entity, e),
        };
        let Some((from, to)) = endpoints else {
            return SyncOutcome::Applied(false);
        };
        match self.store.remove_edge(&from.id, &to.id, Some(episode_id)) {
            Ok(removed) => {
                debug!(episode_id, from_source_id, to_source_id, removed, "edge delete synced");
                SyncOutcome::Applied(removed)
            }
            Err(e) => ignored("delete_edge", entity, e),
        }
    }
}
