//! Entry points for the relational write path.

use crate::concept::ConceptSyncService;
use crate::records::{CharacterRecord, ConceptRecord, RelationshipRecord};
use crate::retrieval::HybridRetrievalService;
use crate::sync::SyncService;
use castgraph::{GraphMirrorStore, SourceType};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Called by the relational layer after a write to `E` has committed.
///
/// Implementations must not panic or fail: the relational write has already
/// succeeded and stays successful whatever happens here.
pub trait LifecycleHook<E> {
    fn on_created(&self, entity: &E);
    fn on_updated(&self, entity: &E);
    fn on_deleted(&self, entity: &E);
}

/// Forwards relational lifecycle events to the graph mirror and, when
/// attached, to the vector index.
#[derive(Clone)]
pub struct MirrorHooks {
    sync: SyncService,
    concepts: ConceptSyncService,
    retrieval: Option<Arc<HybridRetrievalService>>,
}

impl MirrorHooks {
    pub fn new(store: Arc<dyn GraphMirrorStore>) -> Self {
        Self {
            sync: SyncService::new(store.clone()),
            concepts: ConceptSyncService::new(store),
            retrieval: None,
        }
    }

    /// Also keep character and concept text in the vector index.
    pub fn with_retrieval(mut self, retrieval: Arc<HybridRetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    fn index(&self, source_type: SourceType, source_id: i64, project_id: i64, text: &str) {
        let Some(retrieval) = &self.retrieval else {
            return;
        };
        let metadata = json!({ "project_id": project_id });
        if let Err(e) = retrieval.upsert(source_type, source_id, text, Some(metadata)) {
            warn!(%source_type, source_id, error = %e, "vector index update skipped");
        }
    }

    fn unindex(&self, source_type: SourceType, source_id: i64) {
        let Some(retrieval) = &self.retrieval else {
            return;
        };
        if let Err(e) = retrieval.delete(source_type, source_id) {
            warn!(%source_type, source_id, error = %e, "vector index delete skipped");
        }
    }

    fn upsert_character(&self, character: &CharacterRecord) {
        let _ = self.sync.sync_character(character);
        self.index(
            SourceType::Character,
            character.id,
            character.project_id,
            &character.embedding_text(),
        );
    }

    fn upsert_relationship(&self, relationship: &RelationshipRecord) {
        // Already logged by the sync service; the relational write stands.
        let _ = self.sync.sync_edge(relationship);
    }

    fn upsert_concept(&self, concept: &ConceptRecord) {
        let _ = self.concepts.sync_concept_record(concept);
        self.index(
            SourceType::Concept,
            concept.id,
            concept.project_id,
            &concept.embedding_text(),
        );
    }
}

impl LifecycleHook<CharacterRecord> for MirrorHooks {
    fn on_created(&self, entity: &CharacterRecord) {
        self.upsert_character(entity);
    }

    fn on_updated(&self, entity: &CharacterRecord) {
        self.upsert_character(entity);
    }

    fn on_deleted(&self, entity: &CharacterRecord) {
        let _ = self.sync.delete_character(entity.id);
        self.unindex(SourceType::Character, entity.id);
    }
}

impl LifecycleHook<RelationshipRecord> for MirrorHooks {
    fn on_created(&self, entity: &RelationshipRecord) {
        self.upsert_relationship(entity);
    }

    fn on_updated(&self, entity: &RelationshipRecord) {
        self.upsert_relationship(entity);
    }

    fn on_deleted(&self, entity: &RelationshipRecord) {
        let _ = self
            .sync
            .delete_edge(entity.episode_id, entity.from.id, entity.to.id);
    }
}

impl LifecycleHook<ConceptRecord> for MirrorHooks {
    fn on_created(&self, entity: &ConceptRecord) {
        self.upsert_concept(entity);
    }

    fn on_updated(&self, entity: &ConceptRecord) {
        self.upsert_concept(entity);
    }

    fn on_deleted(&self, entity: &ConceptRecord) {
        let _ = self.concepts.delete_concept(entity.id);
        self.unindex(SourceType::Concept, entity.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingAdapter;
    use crate::testing::{relationship, FlakyStore, PROJECT};
    use castgraph::{GraphMirror, NodeKind, VectorStore};

    fn hooks_with_index() -> (MirrorHooks, Arc<GraphMirror>, Arc<HybridRetrievalService>) {
        let mirror = Arc::new(GraphMirror::open_in_memory().unwrap());
        let retrieval = Arc::new(HybridRetrievalService::new(
            Arc::new(VectorStore::open_in_memory().unwrap()),
            EmbeddingAdapter::fallback_only(16),
        ));
        let hooks = MirrorHooks::new(mirror.clone()).with_retrieval(retrieval.clone());
        (hooks, mirror, retrieval)
    }

    #[test]
    fn character_lifecycle_reaches_both_stores() {
        let (hooks, mirror, retrieval) = hooks_with_index();
        let mut ava = CharacterRecord::new(1, PROJECT, "Ava");
        hooks.on_created(&ava);

        ava.description = Some("keeper of the lighthouse".into());
        hooks.on_updated(&ava);

        let node = mirror.node_by_source(NodeKind::Character, 1).unwrap().unwrap();
        assert_eq!(node.description.as_deref(), Some("keeper of the lighthouse"));
        let record = retrieval.store().get(SourceType::Character, 1).unwrap().unwrap();
        assert_eq!(record.text_chunk, "Ava: keeper of the lighthouse");
        assert_eq!(record.metadata, Some(json!({ "project_id": PROJECT })));

        hooks.on_deleted(&ava);
        assert!(mirror.node_by_source(NodeKind::Character, 1).unwrap().is_none());
        assert!(retrieval.store().get(SourceType::Character, 1).unwrap().is_none());
    }

    #[test]
    fn relationship_lifecycle() {
        let (hooks, mirror, _retrieval) = hooks_with_index();
        let rel = relationship(7, 3, (1, "Ava"), (2, "Ben"), "friend", 2.0);

        hooks.on_created(&rel);
        assert_eq!(mirror.stats().unwrap().edges, 1);

        hooks.on_deleted(&rel);
        assert_eq!(mirror.stats().unwrap().edges, 0);
        assert_eq!(mirror.stats().unwrap().characters, 2);
    }

    #[test]
    fn relationship_update_replaces_its_old_edge() {
        let (hooks, mirror, _retrieval) = hooks_with_index();
        let mut rel = relationship(7, 1, (1, "Ava"), (2, "Ben"), "friend", 2.0);
        hooks.on_created(&rel);

        rel.episode_id = 2;
        hooks.on_updated(&rel);
        assert_eq!(mirror.stats().unwrap().edges, 1);

        rel.to = CharacterRecord::new(3, PROJECT, "Cal");
        hooks.on_updated(&rel);
        assert_eq!(mirror.stats().unwrap().edges, 1);

        let ava = mirror.node_by_source(NodeKind::Character, 1).unwrap().unwrap();
        let edges = mirror.edges_from(&ava.id).unwrap();
        assert_eq!(edges[0].episode_id, Some(2));
        let cal = mirror.node_by_source(NodeKind::Character, 3).unwrap().unwrap();
        assert_eq!(edges[0].to, cal.id);

        hooks.on_deleted(&rel);
        assert_eq!(mirror.stats().unwrap().edges, 0);
    }

    #[test]
    fn concept_lifecycle() {
        let (hooks, mirror, retrieval) = hooks_with_index();
        let grief = ConceptRecord::new(4, PROJECT, "grief");
        hooks.on_created(&grief);
        assert_eq!(mirror.stats().unwrap().concepts, 1);
        assert!(retrieval.store().get(SourceType::Concept, 4).unwrap().is_some());

        hooks.on_deleted(&grief);
        assert_eq!(mirror.stats().unwrap().concepts, 0);
        assert!(retrieval.store().get(SourceType::Concept, 4).unwrap().is_none());
    }

    #[test]
    fn failing_mirror_never_panics_the_caller() {
        let store = Arc::new(FlakyStore::new());
        store.fail_node(1);
        store.fail_edges(true);
        let hooks = MirrorHooks::new(store.clone());

        hooks.on_created(&CharacterRecord::new(1, PROJECT, "Ava"));
        hooks.on_created(&relationship(7, 3, (2, "Ben"), (3, "Cal"), "friend", 2.0));
        hooks.on_deleted(&CharacterRecord::new(1, PROJECT, "Ava"));

        let stats = store.inner().stats().unwrap();
        assert_eq!(stats.characters, 2);
        assert_eq!(stats.edges, 0);
    }
}
