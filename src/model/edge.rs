//! Undirected edge between two network nodes.

use serde::{Deserialize, Serialize};
use super::NodeId;

/// An undirected edge. `length` is used by weighted shortest-path
/// neighborhoods; when absent the layout distance of the endpoints applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: NodeId,
    pub b: NodeId,
    pub length: Option<f64>,
}

impl Edge {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        Self { a, b, length: None }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    /// The "other" end of the edge from the given node.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.a { Some(self.b) }
        else if from == self.b { Some(self.a) }
        else { None }
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }
}
