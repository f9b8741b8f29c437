//! Concept nodes and the explicit links between them.
//!
//! Concept upserts and deletes follow the same best-effort rules as
//! characters. Concept links are different: they are authored directly and
//! cannot be rebuilt from relational rows, so their failures propagate.

use crate::error::SyncError;
use crate::records::ConceptRecord;
use crate::sync::{SyncOutcome, SyncService};
use castgraph::{EdgeSpec, GraphEdge, GraphMirrorStore, GraphNode, NodeKind, SourceRecord};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ConceptSyncService {
    sync: SyncService,
}

impl ConceptSyncService {
    pub fn new(store: Arc<dyn GraphMirrorStore>) -> Self {
        Self {
            sync: SyncService::new(store),
        }
    }

    pub fn sync_concept(&self, record: &SourceRecord) -> SyncOutcome<GraphNode> {
        self.sync.sync_node(NodeKind::Concept, record)
    }

    pub fn sync_concept_record(&self, concept: &ConceptRecord) -> SyncOutcome<GraphNode> {
        self.sync_concept(&concept.to_source())
    }

    pub fn delete_concept(&self, source_id: i64) -> SyncOutcome<bool> {
        self.sync.delete_node(NodeKind::Concept, source_id)
    }

    /// Link two concepts of the same project. Re-creating a link between the
    /// same pair replaces it.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`] for a blank relation type, a
    ///   similarity outside `0.0..=1.0`, a self-link, or endpoints in
    ///   different projects.
    /// - [`SyncError::MissingEndpoint`] if either concept is not mirrored.
    /// - [`SyncError::Store`] if the mirror cannot be read or written.
    pub fn create_concept_relationship(
        &self,
        from_source_id: i64,
        to_source_id: i64,
        relation_type: &str,
        similarity: f64,
    ) -> Result<GraphEdge, SyncError> {
        if relation_type.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "relation_type must not be blank".into(),
            ));
        }
        if !similarity.is_finite() || !(0.0..=1.0).contains(&similarity) {
            return Err(SyncError::InvalidArgument(format!(
                "similarity must be within 0.0..=1.0, got {similarity}"
            )));
        }
        if from_source_id == to_source_id {
            return Err(SyncError::InvalidArgument(format!(
                "concept {from_source_id} cannot be linked to itself"
            )));
        }

        let store = self.sync.store();
        let from = store
            .node_by_source(NodeKind::Concept, from_source_id)?
            .ok_or_else(|| SyncError::MissingEndpoint(format!("concept {from_source_id}")))?;
        let to = store
            .node_by_source(NodeKind::Concept, to_source_id)?
            .ok_or_else(|| SyncError::MissingEndpoint(format!("concept {to_source_id}")))?;
        if from.project_id != to.project_id {
            return Err(SyncError::InvalidArgument(format!(
                "concepts {from_source_id} and {to_source_id} belong to different projects"
            )));
        }

        let spec = EdgeSpec::link(relation_type, similarity);
        let edge = store.replace_edge(&from.id, &to.id, &spec)?;
        info!(
            from_source_id,
            to_source_id,
            relation_type,
            similarity,
            "concept link written"
        );
        Ok(edge)
    }

    /// Remove the link between two concepts. `Ok(false)` when absent.
    pub fn delete_concept_relationship(
        &self,
        from_source_id: i64,
        to_source_id: i64,
    ) -> Result<bool, SyncError> {
        let store = self.sync.store();
        let from = store.node_by_source(NodeKind::Concept, from_source_id)?;
        let to = store.node_by_source(NodeKind::Concept, to_source_id)?;
        match from.zip(to) {
            Some((from, to)) => Ok(store.remove_edge(&from.id, &to.id, None)?),
            None => Ok(false),
        }
    }
}
