//! Read-only traversals over the graph mirror.
//!
//! Every traversal runs inside one read transaction, walks edges in both
//! directions, and never leaves the project it was asked about: an edge is
//! followed only when its `project_id` matches, and a neighbour is visited
//! only when it belongs to the same project and has the same [`NodeKind`] as
//! the start node.
//!
//! Work is bounded by the caller: `neighbors_within` stops at `max_depth`
//! hops and `shortest_path` stops as soon as the target is discovered.

use crate::{
    out_key, scan_in_keys, scan_prefix, split_in_key, GraphEdge, GraphMirror, GraphNode, NodeId,
    NodeKind, Result, EDGES_IN, EDGES_OUT, NODES,
};
use redb::{ReadOnlyTable, ReadableDatabase, ReadableTable};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

/// A node reached by a bounded traversal, with its hop distance from the start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachedNode {
    pub node: GraphNode,
    pub hops: usize,
}

/// A node with the number of edges touching it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNode {
    pub node: GraphNode,
    pub degree: usize,
}

/// Open tables for one traversal.
struct View {
    nodes: ReadOnlyTable<&'static str, &'static str>,
    out: ReadOnlyTable<&'static str, &'static str>,
    incoming: ReadOnlyTable<&'static str, ()>,
}

impl View {
    fn node(&self, id: &NodeId) -> Result<Option<GraphNode>> {
        match self.nodes.get(id.0.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Edges touching `id` in either direction, paired with the node on the
    /// other end. Only edges of `project_id` are returned.
    fn incident(&self, id: &NodeId, project_id: i64) -> Result<Vec<(NodeId, GraphEdge)>> {
        let mut found = Vec::new();
        for (_k, v) in scan_prefix(&self.out, &format!("{id}/"))? {
            let edge: GraphEdge = serde_json::from_str(&v)?;
            if edge.project_id == project_id {
                found.push((edge.to.clone(), edge));
            }
        }
        for k in scan_in_keys(&self.incoming, &format!("{id}/"))? {
            let Some((from, scope)) = split_in_key(&k) else {
                continue;
            };
            if let Some(guard) = self.out.get(out_key(&from, &scope, id).as_str())? {
                let edge: GraphEdge = serde_json::from_str(guard.value())?;
                if edge.project_id == project_id {
                    found.push((from, edge));
                }
            }
        }
        Ok(found)
    }

    /// Load `id` if it is a visitable neighbour: same project, same kind.
    fn visitable(&self, id: &NodeId, project_id: i64, kind: NodeKind) -> Result<Option<GraphNode>> {
        Ok(self
            .node(id)?
            .filter(|n| n.project_id == project_id && n.kind == kind))
    }
}

impl GraphMirror {
    fn view(&self) -> Result<View> {
        let read_txn = self.db.begin_read()?;
        Ok(View {
            nodes: read_txn.open_table(NODES)?,
            out: read_txn.open_table(EDGES_OUT)?,
            incoming: read_txn.open_table(EDGES_IN)?,
        })
    }

    /// Breadth-first search up to `max_depth` hops from `start`.
    ///
    /// Results are deduplicated by node identity, exclude the start node, and
    /// are ordered by hop distance then name. A start node outside
    /// `project_id` yields an empty result.
    pub fn neighbors_within(
        &self,
        start: &NodeId,
        project_id: i64,
        max_depth: usize,
    ) -> Result<Vec<ReachedNode>> {
        let view = self.view()?;
        let Some(origin) = view.node(start)? else {
            return Ok(Vec::new());
        };
        if origin.project_id != project_id {
            return Ok(Vec::new());
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        let mut reached = Vec::new();

        visited.insert(start.clone());
        queue.push_back((start.clone(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (neighbor, _edge) in view.incident(&current, project_id)? {
                if visited.contains(&neighbor) {
                    continue;
                }
                let Some(node) = view.visitable(&neighbor, project_id, origin.kind)? else {
                    continue;
                };
                visited.insert(neighbor.clone());
                reached.push(ReachedNode {
                    node,
                    hops: depth + 1,
                });
                queue.push_back((neighbor, depth + 1));
            }
        }

        reached.sort_by(|a, b| {
            a.hops
                .cmp(&b.hops)
                .then_with(|| a.node.name.cmp(&b.node.name))
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        Ok(reached)
    }

    /// Shortest undirected path from `from` to `to`, inclusive of both ends.
    ///
    /// Returns `Ok(None)` when either endpoint is unknown or outside the
    /// project, or when no path exists. Callers reject `from == to` before
    /// calling; here it yields the single-node path.
    pub fn shortest_path(
        &self,
        from: &NodeId,
        to: &NodeId,
        project_id: i64,
    ) -> Result<Option<Vec<GraphNode>>> {
        let view = self.view()?;
        let Some(origin) = view.node(from)? else {
            return Ok(None);
        };
        if origin.project_id != project_id {
            return Ok(None);
        }
        let Some(target) = view.visitable(to, project_id, origin.kind)? else {
            return Ok(None);
        };
        if from == to {
            return Ok(Some(vec![origin]));
        }

        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        visited.insert(from.clone());
        queue.push_back(from.clone());

        let mut found = false;
        'search: while let Some(current) = queue.pop_front() {
            for (neighbor, _edge) in view.incident(&current, project_id)? {
                if visited.contains(&neighbor) {
                    continue;
                }
                if view.visitable(&neighbor, project_id, origin.kind)?.is_none() {
                    continue;
                }
                visited.insert(neighbor.clone());
                parent.insert(neighbor.clone(), current.clone());
                if &neighbor == to {
                    found = true;
                    break 'search;
                }
                queue.push_back(neighbor);
            }
        }
        if !found {
            return Ok(None);
        }

        let ids = reconstruct_path(&parent, from, to);
        let mut path = Vec::with_capacity(ids.len());
        for id in &ids {
            if id == to {
                path.push(target.clone());
            } else if let Some(node) = view.node(id)? {
                path.push(node);
            }
        }
        Ok(Some(path))
    }

    /// Neighbours one hop from `start` over edges labelled `relation_type`,
    /// in either direction, deduplicated and ordered by name.
    pub fn related_by_type(
        &self,
        start: &NodeId,
        project_id: i64,
        relation_type: &str,
    ) -> Result<Vec<GraphNode>> {
        let view = self.view()?;
        let Some(origin) = view.node(start)? else {
            return Ok(Vec::new());
        };
        if origin.project_id != project_id {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut related = Vec::new();
        for (neighbor, edge) in view.incident(start, project_id)? {
            if edge.relation_type != relation_type || &neighbor == start {
                continue;
            }
            if !seen.insert(neighbor.clone()) {
                continue;
            }
            if let Some(node) = view.visitable(&neighbor, project_id, origin.kind)? {
                related.push(node);
            }
        }
        related.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(related)
    }

    /// Nodes of `kind` in `project_id` ranked by incident-edge count.
    ///
    /// Both ends of an edge count it once. Only edges whose endpoints are both
    /// of `kind` and in the project are counted; nodes with no such edge are
    /// not ranked. Ties break by name, then by node id.
    pub fn most_connected(
        &self,
        project_id: i64,
        kind: NodeKind,
        limit: usize,
    ) -> Result<Vec<RankedNode>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let view = self.view()?;

        let mut members: HashMap<NodeId, GraphNode> = HashMap::new();
        for entry in view.nodes.iter()? {
            let (_k, v) = entry?;
            let node: GraphNode = serde_json::from_str(v.value())?;
            if node.project_id == project_id && node.kind == kind {
                members.insert(node.id.clone(), node);
            }
        }

        let mut degree: HashMap<NodeId, usize> = HashMap::new();
        for entry in view.out.iter()? {
            let (_k, v) = entry?;
            let edge: GraphEdge = serde_json::from_str(v.value())?;
            if edge.project_id != project_id
                || !members.contains_key(&edge.from)
                || !members.contains_key(&edge.to)
            {
                continue;
            }
            *degree.entry(edge.from).or_default() += 1;
            *degree.entry(edge.to).or_default() += 1;
        }

        let mut ranked: Vec<RankedNode> = degree
            .into_iter()
            .filter_map(|(id, degree)| {
                members
                    .remove(&id)
                    .map(|node| RankedNode { node, degree })
            })
            .collect();
        ranked.sort_by(|a, b| match b.degree.cmp(&a.degree) {
            Ordering::Equal => a
                .node
                .name
                .cmp(&b.node.name)
                .then_with(|| a.node.id.cmp(&b.node.id)),
            other => other,
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

/// Walk the BFS parent map back from `target` to `source`.
fn reconstruct_path(
    parent: &HashMap<NodeId, NodeId>,
    source: &NodeId,
    target: &NodeId,
) -> Vec<NodeId> {
    let mut path = vec![target.clone()];
    let mut current = target;
    while current != source {
        match parent.get(current) {
            Some(prev) => {
                path.push(prev.clone());
                current = prev;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeSpec, SourceRecord};

    fn mirror() -> GraphMirror {
        GraphMirror::open_in_memory().unwrap()
    }

    fn add(mirror: &GraphMirror, source_id: i64, project_id: i64, name: &str) -> GraphNode {
        mirror
            .upsert_node(
                NodeKind::Character,
                &SourceRecord::new(source_id, project_id, name),
            )
            .unwrap()
    }

    fn link(mirror: &GraphMirror, a: &GraphNode, b: &GraphNode, relation: &str) {
        mirror
            .replace_edge(&a.id, &b.id, &EdgeSpec::episode(1, relation, 1.0))
            .unwrap();
    }

    /// A - B - C - D chain plus E hanging off A, all in project 1.
    fn chain() -> (GraphMirror, Vec<GraphNode>) {
        let m = mirror();
        let a = add(&m, 1, 1, "Ava");
        let b = add(&m, 2, 1, "Ben");
        let c = add(&m, 3, 1, "Cal");
        let d = add(&m, 4, 1, "Dee");
        let e = add(&m, 5, 1, "Eli");
        link(&m, &a, &b, "friend");
        link(&m, &c, &b, "rival");
        link(&m, &c, &d, "friend");
        link(&m, &e, &a, "sibling");
        (m, vec![a, b, c, d, e])
    }

    #[test]
    fn neighbors_within_respects_depth() {
        let (m, n) = chain();

        let one = m.neighbors_within(&n[0].id, 1, 1).unwrap();
        let names: Vec<&str> = one.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["Ben", "Eli"]);

        let three = m.neighbors_within(&n[0].id, 1, 3).unwrap();
        assert_eq!(three.len(), 4);
        assert_eq!(three.last().unwrap().node.name, "Dee");
        assert_eq!(three.last().unwrap().hops, 3);
    }

    #[test]
    fn neighbors_within_follows_incoming_edges_and_dedupes() {
        let (m, n) = chain();
        // Second edge between Ava and Ben in another episode must not duplicate Ben.
        m.replace_edge(&n[1].id, &n[0].id, &EdgeSpec::episode(2, "friend", 2.0))
            .unwrap();

        let reached = m.neighbors_within(&n[1].id, 1, 1).unwrap();
        let names: Vec<&str> = reached.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["Ava", "Cal"]);
    }

    #[test]
    fn neighbors_within_stays_in_project() {
        let (m, n) = chain();
        let outsider = add(&m, 99, 2, "Zed");
        m.replace_edge(&n[0].id, &outsider.id, &EdgeSpec::episode(1, "friend", 1.0))
            .unwrap();

        let reached = m.neighbors_within(&n[0].id, 1, 5).unwrap();
        assert!(reached.iter().all(|r| r.node.project_id == 1));
        assert!(m.neighbors_within(&n[0].id, 2, 5).unwrap().is_empty());
    }

    #[test]
    fn shortest_path_finds_minimal_route() {
        let (m, n) = chain();
        let path = m.shortest_path(&n[4].id, &n[3].id, 1).unwrap().unwrap();
        let names: Vec<&str> = path.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Eli", "Ava", "Ben", "Cal", "Dee"]);
    }

    #[test]
    fn shortest_path_none_when_disconnected() {
        let (m, n) = chain();
        let island = add(&m, 42, 1, "Ivy");
        assert!(m.shortest_path(&n[0].id, &island.id, 1).unwrap().is_none());
        assert!(m.shortest_path(&n[0].id, &NodeId::new(), 1).unwrap().is_none());
    }

    #[test]
    fn related_by_type_filters_single_hop() {
        let (m, n) = chain();
        let friends = m.related_by_type(&n[2].id, 1, "friend").unwrap();
        let names: Vec<&str> = friends.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Dee"]);

        let rivals = m.related_by_type(&n[1].id, 1, "rival").unwrap();
        assert_eq!(rivals.len(), 1);
        assert_eq!(rivals[0].name, "Cal");
    }

    #[test]
    fn most_connected_ranks_by_degree() {
        let (m, _n) = chain();
        let ranked = m.most_connected(1, NodeKind::Character, 3).unwrap();
        assert_eq!(ranked.len(), 3);
        // Ava, Ben, Cal each have degree 2; ties break by name.
        let names: Vec<&str> = ranked.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(names, vec!["Ava", "Ben", "Cal"]);
        assert!(ranked.iter().all(|r| r.degree == 2));
    }

    #[test]
    fn most_connected_never_leaks_other_projects() {
        let (m, _n) = chain();
        let x = add(&m, 10, 2, "Xan");
        let y = add(&m, 11, 2, "Yul");
        let z = add(&m, 12, 2, "Zia");
        link(&m, &x, &y, "friend");
        link(&m, &x, &z, "friend");
        link(&m, &y, &z, "friend");

        let ranked = m.most_connected(1, NodeKind::Character, 50).unwrap();
        assert!(!ranked.is_empty());
        assert!(ranked.iter().all(|r| r.node.project_id == 1));

        let other = m.most_connected(2, NodeKind::Character, 50).unwrap();
        assert_eq!(other.len(), 3);
        assert!(other.iter().all(|r| r.node.project_id == 2));
    }
}
