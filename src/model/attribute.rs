//! Node attributes: the N × M annotation matrix.

use std::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use super::{Matrix, Network, NodeId};
use crate::{Error, Result};

/// Dense attribute identifier (column position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

impl AttributeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub name: String,
}

/// Why an attribute column cannot be tested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Degeneracy {
    /// Every node is missing a value.
    AllMissing,
    /// All non-missing values are identical.
    Constant(f64),
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degeneracy::AllMissing => write!(f, "all values missing"),
            Degeneracy::Constant(v) => write!(f, "constant value {v}"),
        }
    }
}

/// Node × attribute values. `None` is the missing sentinel; it is never
/// read as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMatrix {
    node_ids: Vec<NodeId>,
    attributes: Vec<Attribute>,
    values: Matrix<Option<f64>>,
}

impl AttributeMatrix {
    /// Build from row-major values. Rows follow `node_ids`, columns follow
    /// `names`.
    pub fn new(
        node_ids: Vec<NodeId>,
        names: Vec<String>,
        values: Matrix<Option<f64>>,
    ) -> Result<Self> {
        if values.shape() != (node_ids.len(), names.len()) {
            return Err(Error::InvalidInput(format!(
                "Attribute values have shape {:?}, expected ({}, {})",
                values.shape(), node_ids.len(), names.len()
            )));
        }

        {
            let mut seen = HashSet::with_capacity(names.len());
            for name in &names {
                if !seen.insert(name.as_str()) {
                    return Err(Error::InvalidInput(format!("Duplicate attribute name '{name}'")));
                }
            }
        }

        if let Some(pos) = values.as_slice().iter().position(|v| v.is_some_and(|x| !x.is_finite())) {
            return Err(Error::InvalidInput(format!(
                "Non-finite value for node {} attribute '{}' (use None for missing)",
                node_ids[pos / names.len()], names[pos % names.len()]
            )));
        }

        let attributes = names.into_iter()
            .enumerate()
            .map(|(i, name)| Attribute { id: AttributeId(i as u32), name })
            .collect();

        Ok(Self { node_ids, attributes, values })
    }

    /// Build from one `Vec` per node.
    pub fn from_rows(
        node_ids: Vec<NodeId>,
        names: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        let cols = names.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(Error::InvalidInput(format!(
                "Row {i} has {} values, expected {cols}", row.len()
            )));
        }
        let n = rows.len();
        let values = Matrix::from_vec(n, cols, rows.into_iter().flatten().collect())
            .ok_or_else(|| Error::InvalidInput("Ragged attribute rows".into()))?;
        Self::new(node_ids, names, values)
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        &self.attributes[id.index()]
    }

    pub fn values(&self) -> &Matrix<Option<f64>> {
        &self.values
    }

    #[inline]
    pub fn value(&self, node: usize, attribute: usize) -> Option<f64> {
        *self.values.get(node, attribute)
    }

    /// Rows must match the network's node order exactly.
    pub fn check_alignment(&self, network: &Network) -> Result<()> {
        if self.node_count() != network.len() {
            return Err(Error::Alignment(format!(
                "Attribute matrix has {} rows but network has {} nodes",
                self.node_count(), network.len()
            )));
        }
        if let Some((i, (row, node))) = self.node_ids.iter()
            .zip(network.node_ids())
            .enumerate()
            .find(|(_, (row, node))| **row != *node)
        {
            return Err(Error::Alignment(format!(
                "Row {i} is node {row} but network node {i} is {node}"
            )));
        }
        Ok(())
    }

    /// Classify a column as testable or degenerate.
    pub fn degeneracy(&self, attribute: usize) -> Option<Degeneracy> {
        let mut present = self.values.column(attribute).filter_map(|v| *v);
        let first = match present.next() {
            Some(v) => v,
            None => return Some(Degeneracy::AllMissing),
        };
        if present.all(|v| v == first) {
            Some(Degeneracy::Constant(first))
        } else {
            None
        }
    }

    /// `Err(DegenerateInput)` when the column cannot be tested.
    pub fn check_column(&self, attribute: usize) -> Result<()> {
        match self.degeneracy(attribute) {
            None => Ok(()),
            Some(reason) => Err(Error::DegenerateInput {
                attribute: self.attributes[attribute].name.clone(),
                reason: reason.to_string(),
            }),
        }
    }

    /// True when every non-missing value in the column is 0 or 1.
    pub fn is_binary(&self, attribute: usize) -> bool {
        self.values.column(attribute)
            .filter_map(|v| *v)
            .all(|v| v == 0.0 || v == 1.0)
    }
}
