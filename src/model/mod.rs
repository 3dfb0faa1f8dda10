//! # Network Model
//!
//! Plain data types that cross every stage boundary:
//! loader → neighborhoods → scoring → significance → domains → reports.
//!
//! Design rule: nodes and attributes are dense integer indices, and every
//! per-(node, attribute) quantity lives in a flat [`Matrix`]. No pointer
//! graphs, no I/O, no shared state.

pub mod node;
pub mod edge;
pub mod network;
pub mod attribute;
pub mod matrix;

pub use node::{Node, NodeId};
pub use edge::Edge;
pub use network::Network;
pub use attribute::{Attribute, AttributeId, AttributeMatrix, Degeneracy};
pub use matrix::Matrix;
