//! Network: the undirected, laid-out graph under analysis.
//!
//! Nodes are addressed by dense indices `0..len()` in the order the loader
//! supplied them. That order is the row order every attribute matrix and
//! every result matrix must follow.

use hashbrown::HashMap;

use super::{Edge, Node, NodeId};
use crate::{Error, Result};

/// Immutable undirected network with CSR adjacency.
#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// NodeId → dense index
    index: HashMap<NodeId, usize>,
    /// adjacency of node `i` is `neighbors[offsets[i]..offsets[i + 1]]`
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    /// resolved edge length per adjacency entry
    lengths: Vec<f64>,
}

impl Network {
    /// Build a network, validating ids, coordinates and edge endpoints.
    ///
    /// Self loops are dropped. Parallel edges collapse into one, keeping the
    /// shortest length.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if !node.x.is_finite() || !node.y.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "Node {} has a non-finite layout position", node.id
                )));
            }
            if index.insert(node.id, i).is_some() {
                return Err(Error::InvalidInput(format!("Duplicate node id {}", node.id)));
            }
        }

        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            let a = *index.get(&edge.a)
                .ok_or_else(|| Error::InvalidInput(format!("Edge references unknown node {}", edge.a)))?;
            let b = *index.get(&edge.b)
                .ok_or_else(|| Error::InvalidInput(format!("Edge references unknown node {}", edge.b)))?;
            if edge.is_self_loop() {
                continue;
            }
            let length = match edge.length {
                Some(l) if l.is_finite() && l >= 0.0 => l,
                Some(l) => {
                    return Err(Error::InvalidInput(format!(
                        "Edge {}-{} has invalid length {l}", edge.a, edge.b
                    )));
                }
                None => nodes[a].layout_distance(&nodes[b]),
            };
            adjacency[a].push((b, length));
            adjacency[b].push((a, length));
        }

        let mut offsets = Vec::with_capacity(nodes.len() + 1);
        let mut neighbors = Vec::new();
        let mut lengths = Vec::new();
        offsets.push(0);
        for list in &mut adjacency {
            list.sort_by(|x, y| x.0.cmp(&y.0).then(x.1.total_cmp(&y.1)));
            list.dedup_by_key(|entry| entry.0);
            for &(j, l) in list.iter() {
                neighbors.push(j);
                lengths.push(l);
            }
            offsets.push(neighbors.len());
        }

        Ok(Self { nodes, edges, index, offsets, neighbors, lengths })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of distinct undirected, non-loop edges.
    pub fn edge_count(&self) -> usize {
        self.neighbors.len() / 2
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Sorted, de-duplicated neighbor indices of node `index`.
    pub fn neighbors(&self, index: usize) -> &[usize] {
        &self.neighbors[self.offsets[index]..self.offsets[index + 1]]
    }

    /// Edge lengths aligned with [`Network::neighbors`].
    pub fn neighbor_lengths(&self, index: usize) -> &[f64] {
        &self.lengths[self.offsets[index]..self.offsets[index + 1]]
    }

    pub fn degree(&self, index: usize) -> usize {
        self.offsets[index + 1] - self.offsets[index]
    }

    pub fn are_adjacent(&self, a: usize, b: usize) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    /// Width of the layout along x (`max x − min x`), 0 for an empty network.
    pub fn layout_extent_x(&self) -> f64 {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for node in &self.nodes {
            min = min.min(node.x);
            max = max.max(node.x);
        }
        if min.is_finite() { max - min } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path3() -> Network {
        let nodes = (1..=3).map(|i| Node::new(NodeId(i)).at(i as f64, 0.0)).collect();
        let edges = vec![
            Edge::new(NodeId(1), NodeId(2)),
            Edge::new(NodeId(2), NodeId(3)).with_length(5.0),
            Edge::new(NodeId(3), NodeId(2)),
            Edge::new(NodeId(3), NodeId(3)),
        ];
        Network::new(nodes, edges).unwrap()
    }

    #[test]
    fn builds_symmetric_deduplicated_adjacency() {
        let net = path3();
        assert_eq!(net.neighbors(0), &[1]);
        assert_eq!(net.neighbors(1), &[0, 2]);
        assert_eq!(net.neighbors(2), &[1]);
        assert_eq!(net.edge_count(), 2);
        assert!(net.are_adjacent(2, 1));
        assert!(!net.are_adjacent(0, 2));
    }

    #[test]
    fn parallel_edges_keep_shortest_length() {
        let net = path3();
        // explicit 5.0 vs layout distance 1.0
        assert_eq!(net.neighbor_lengths(1), &[1.0, 1.0]);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let nodes = vec![Node::new(NodeId(7)), Node::new(NodeId(7))];
        assert!(matches!(Network::new(nodes, vec![]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_dangling_edge() {
        let nodes = vec![Node::new(NodeId(1))];
        let edges = vec![Edge::new(NodeId(1), NodeId(99))];
        assert!(matches!(Network::new(nodes, edges), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn layout_extent() {
        assert_eq!(path3().layout_extent_x(), 2.0);
    }
}
