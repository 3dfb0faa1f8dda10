//! Node in the analysed network.

use serde::{Deserialize, Serialize};

/// Stable external node identifier (the loader's key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A network node with its 2D layout position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable label (gene name, ORF, ...).
    pub label: String,
    pub x: f64,
    pub y: f64,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            label: String::new(),
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Euclidean distance between two layout positions.
    pub fn layout_distance(&self, other: &Node) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
