//! Attribute filter: which enriched attributes take part in domain
//! building.
//!
//! An attribute qualifies when enough nodes are enriched for it and,
//! optionally, when those nodes induce a single connected piece of the
//! network.

use serde::{Deserialize, Serialize};

use super::union_find::UnionFind;
use crate::model::Network;
use crate::significance::Significance;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub min_enriched_nodes: usize,
    pub require_single_component: bool,
}

impl Default for AttributeFilter {
    fn default() -> Self {
        Self { min_enriched_nodes: 1, require_single_component: false }
    }
}

/// Per-attribute enrichment footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFootprint {
    pub enriched_nodes: usize,
    /// Connected components of the subnetwork induced by the enriched
    /// nodes. Zero when no node is enriched.
    pub components: usize,
    pub eligible: bool,
}

impl AttributeFilter {
    pub fn apply(&self, network: &Network, significance: &Significance) -> Result<Vec<AttributeFootprint>> {
        let (rows, cols) = significance.shape();
        if rows != network.len() {
            return Err(Error::Alignment(format!(
                "Significance covers {rows} nodes, network has {}", network.len()
            )));
        }

        let footprints = (0..cols)
            .map(|attribute| {
                let enriched: Vec<bool> = (0..rows)
                    .map(|node| significance.is_enriched(node, attribute))
                    .collect();
                let enriched_nodes = enriched.iter().filter(|e| **e).count();
                let components = induced_components(network, &enriched);
                let eligible = enriched_nodes > 0
                    && enriched_nodes >= self.min_enriched_nodes
                    && (!self.require_single_component || components == 1);
                AttributeFootprint { enriched_nodes, components, eligible }
            })
            .collect();
        Ok(footprints)
    }
}

/// Number of connected components among the `keep` nodes.
pub(crate) fn induced_components(network: &Network, keep: &[bool]) -> usize {
    let mut uf = UnionFind::new(keep.len());
    for (v, _) in keep.iter().enumerate().filter(|(_, k)| **k) {
        for &u in network.neighbors(v) {
            if keep[u] {
                uf.union(v, u);
            }
        }
    }
    let labels = uf.labels();
    keep.iter()
        .enumerate()
        .filter(|&(v, k)| *k && labels[v] == v)
        .count()
}
