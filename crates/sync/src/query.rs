//! Read-only character graph queries, scoped to one project.

use crate::error::QueryError;
use castgraph::{GraphMirrorStore, GraphNode, NodeKind, RankedNode, ReachedNode};
use std::sync::Arc;

/// Deepest traversal [`GraphQueryService::find_n_degree_friends`] accepts.
pub const MAX_DEPTH: usize = 5;
/// Largest ranking [`GraphQueryService::find_most_connected_characters`]
/// returns.
pub const MAX_RANK_LIMIT: usize = 50;

#[derive(Clone)]
pub struct GraphQueryService {
    store: Arc<dyn GraphMirrorStore>,
}

impl GraphQueryService {
    pub fn new(store: Arc<dyn GraphMirrorStore>) -> Self {
        Self { store }
    }

    fn character(&self, source_id: i64) -> Result<Option<GraphNode>, QueryError> {
        Ok(self.store.node_by_source(NodeKind::Character, source_id)?)
    }

    /// Characters within `depth` hops of the given character, following
    /// edges in both directions. Nearest first, then by name.
    ///
    /// An unknown character, or one outside `project_id`, has no friends.
    pub fn find_n_degree_friends(
        &self,
        project_id: i64,
        character_source_id: i64,
        depth: usize,
    ) -> Result<Vec<ReachedNode>, QueryError> {
        if !(1..=MAX_DEPTH).contains(&depth) {
            return Err(QueryError::InvalidArgument(format!(
                "depth must be within 1..={MAX_DEPTH}, got {depth}"
            )));
        }
        let Some(start) = self.character(character_source_id)? else {
            return Ok(Vec::new());
        };
        Ok(self.store.neighbors_within(&start.id, project_id, depth)?)
    }

    /// Shortest undirected path between two characters, both ends
    /// included. `Ok(None)` when either is unknown or they are not
    /// connected.
    pub fn find_shortest_path(
        &self,
        project_id: i64,
        from_source_id: i64,
        to_source_id: i64,
    ) -> Result<Option<Vec<GraphNode>>, QueryError> {
        if from_source_id == to_source_id {
            return Err(QueryError::InvalidArgument(format!(
                "no path from character {from_source_id} to itself"
            )));
        }
        let from = self.character(from_source_id)?;
        let to = self.character(to_source_id)?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(None);
        };
        Ok(self.store.shortest_path(&from.id, &to.id, project_id)?)
    }

    /// Characters one hop away over edges labelled `relation_type`.
    pub fn find_characters_by_relation_type(
        &self,
        project_id: i64,
        character_source_id: i64,
        relation_type: &str,
    ) -> Result<Vec<GraphNode>, QueryError> {
        if relation_type.trim().is_empty() {
            return Err(QueryError::InvalidArgument(
                "relation_type must not be blank".into(),
            ));
        }
        let Some(start) = self.character(character_source_id)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .related_by_type(&start.id, project_id, relation_type.trim())?)
    }

    /// Characters ranked by how many relationships touch them.
    pub fn find_most_connected_characters(
        &self,
        project_id: i64,
        limit: usize,
    ) -> Result<Vec<RankedNode>, QueryError> {
        if !(1..=MAX_RANK_LIMIT).contains(&limit) {
            return Err(QueryError::InvalidArgument(format!(
                "limit must be within 1..={MAX_RANK_LIMIT}, got {limit}"
            )));
        }
        Ok(self
            .store
            .most_connected(project_id, NodeKind::Character, limit)?)
    }
}
