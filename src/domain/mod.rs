//! # Domain consolidation
//!
//! Groups enriched (node, attribute) pairs into functional domains.
//!
//! Every enriched pair of an eligible attribute is a seed. Seeds are
//! joined by union-find:
//!
//! - same attribute, adjacent nodes: when the Jaccard overlap of the two
//!   nodes' enriched-attribute sets is above `overlap_threshold`;
//! - same node, two attributes: when the Jaccard similarity of the two
//!   attributes' enriched-node sets is at least
//!   `attribute_similarity_threshold`.
//!
//! A domain's nodes are the distinct nodes of its seeds, so one node can
//! sit in several domains. With the similarity threshold at 0 every node
//! collapses to a single seed and this is plain node-level union-find.
//!
//! The partition depends only on the seed relation, never on visiting
//! order; domain ids are then assigned by content (smallest member node).

pub mod filter;
mod union_find;

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::model::Network;
use crate::neighborhood::Neighborhoods;
use crate::significance::Significance;
use crate::{Error, Result};

pub use filter::{AttributeFilter, AttributeFootprint};
use union_find::UnionFind;

/// Dense domain identifier, assigned after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub u32);

impl DomainId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain ids of one node, ascending. Most nodes hold zero or one.
pub type DomainSet = SmallVec<[DomainId; 2]>;

/// One functional domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    /// Member node indices, ascending.
    pub nodes: Vec<usize>,
    /// `(attribute, member nodes enriched for it)`, ascending by attribute.
    pub attributes: Vec<(usize, usize)>,
    /// Attribute enriched in the most member nodes; lowest index on ties.
    pub representative: usize,
}

impl Domain {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    pub fn has_attribute(&self, attribute: usize) -> bool {
        self.attributes.binary_search_by_key(&attribute, |(a, _)| *a).is_ok()
    }
}

/// Domain each node is most strongly tied to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimaryDomain {
    pub domain: DomainId,
    /// Largest signed score of the node over the domain's attributes.
    pub score: f64,
}

/// Consolidated domains plus node membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domains {
    pub domains: Vec<Domain>,
    /// Domains each node belongs to.
    pub membership: Vec<DomainSet>,
    /// Attributes each node contributed to each of its domains.
    pub contributions: Vec<SmallVec<[(DomainId, usize); 2]>>,
    pub trimmed: usize,
}

impl Domains {
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn get(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(id.index())
    }

    pub fn of_node(&self, node: usize) -> &[DomainId] {
        &self.membership[node]
    }

    /// The domain holding the most enriched attributes of each node,
    /// lowest id on ties, scored by the node's best signed score there.
    pub fn primary(&self, significance: &Significance) -> Vec<Option<PrimaryDomain>> {
        self.contributions
            .iter()
            .enumerate()
            .map(|(node, held)| {
                let best = held.iter()
                    .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))?;
                let domain = &self.domains[best.0.index()];
                let score = significance
                    .enriched_attributes(node)
                    .filter(|&a| domain.has_attribute(a))
                    .filter_map(|a| significance.signed_score(node, a))
                    .fold(f64::NEG_INFINITY, f64::max);
                Some(PrimaryDomain { domain: best.0, score })
            })
            .collect()
    }
}

// ============================================================================
// Consolidator
// ============================================================================

/// Which node pairs count as neighbors for merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    /// Network edges.
    #[default]
    Adjacent,
    /// Membership in each other's neighborhood.
    Neighborhood,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainConsolidator {
    pub overlap_threshold: f64,
    pub attribute_similarity_threshold: f64,
    pub min_domain_size: usize,
    pub proximity: Proximity,
}

impl Default for DomainConsolidator {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.5,
            attribute_similarity_threshold: 0.0,
            min_domain_size: 1,
            proximity: Proximity::Adjacent,
        }
    }
}

impl DomainConsolidator {
    pub fn new(overlap_threshold: f64) -> Self {
        Self { overlap_threshold, ..Self::default() }
    }

    pub fn attribute_similarity(mut self, threshold: f64) -> Self {
        self.attribute_similarity_threshold = threshold;
        self
    }

    pub fn min_domain_size(mut self, size: usize) -> Self {
        self.min_domain_size = size;
        self
    }

    pub fn proximity(mut self, proximity: Proximity) -> Self {
        self.proximity = proximity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, t) in [
            ("overlap_threshold", self.overlap_threshold),
            ("attribute_similarity_threshold", self.attribute_similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Configuration(format!("{name} must lie in [0, 1], got {t}")));
            }
        }
        Ok(())
    }

    /// Consolidate the enriched pairs of `eligible` attributes (all
    /// attributes when `eligible` is empty). `neighborhoods` is required
    /// for [`Proximity::Neighborhood`].
    pub fn consolidate(
        &self,
        network: &Network,
        significance: &Significance,
        eligible: &[bool],
        neighborhoods: Option<&Neighborhoods>,
    ) -> Result<Domains> {
        self.validate()?;
        let (rows, cols) = significance.shape();
        if rows != network.len() {
            return Err(Error::Alignment(format!(
                "Significance covers {rows} nodes, network has {}", network.len()
            )));
        }
        if !eligible.is_empty() && eligible.len() != cols {
            return Err(Error::Alignment(format!(
                "Attribute filter covers {} attributes, significance has {cols}", eligible.len()
            )));
        }
        let hoods = match (self.proximity, neighborhoods) {
            (Proximity::Neighborhood, None) => {
                return Err(Error::Configuration(
                    "Neighborhood proximity needs the run's neighborhoods".into(),
                ));
            }
            (Proximity::Neighborhood, Some(h)) if h.len() != rows => {
                return Err(Error::Alignment(format!("{} neighborhoods for {rows} nodes", h.len())));
            }
            (Proximity::Neighborhood, Some(h)) => Some(h),
            (Proximity::Adjacent, _) => None,
        };

        let is_eligible = |a: usize| eligible.get(a).copied().unwrap_or(true);

        // enriched attributes per node, enriched nodes per attribute
        let node_attrs: Vec<Vec<usize>> = (0..rows)
            .map(|v| significance.enriched_attributes(v).filter(|&a| is_eligible(a)).collect())
            .collect();
        let mut attr_nodes: Vec<Vec<usize>> = vec![Vec::new(); cols];
        for (v, attrs) in node_attrs.iter().enumerate() {
            for &a in attrs {
                attr_nodes[a].push(v);
            }
        }

        // dense ids for seeds, in (node, attribute) order
        let mut seeds: Vec<(usize, usize)> = Vec::new();
        let mut seed_of: HashMap<(usize, usize), usize> = HashMap::new();
        for (v, attrs) in node_attrs.iter().enumerate() {
            for &a in attrs {
                seed_of.insert((v, a), seeds.len());
                seeds.push((v, a));
            }
        }
        let mut uf = UnionFind::new(seeds.len());

        for (v, attrs) in node_attrs.iter().enumerate() {
            // attributes sharing a node
            for (i, &a) in attrs.iter().enumerate() {
                for &b in &attrs[i + 1..] {
                    if jaccard(&attr_nodes[a], &attr_nodes[b]) >= self.attribute_similarity_threshold {
                        uf.union(seed_of[&(v, a)], seed_of[&(v, b)]);
                    }
                }
            }

            // nodes sharing an attribute
            let near: &[usize] = match hoods {
                Some(h) => h.get(v).members,
                None => network.neighbors(v),
            };
            for &u in near {
                if u == v || node_attrs[u].is_empty() {
                    continue;
                }
                let overlap = jaccard(attrs, &node_attrs[u]);
                if overlap <= self.overlap_threshold {
                    continue;
                }
                for &a in attrs {
                    if let Some(&s) = seed_of.get(&(u, a)) {
                        uf.union(seed_of[&(v, a)], s);
                    }
                }
            }
        }

        let labels = uf.labels();
        let mut groups: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        for (seed, &label) in labels.iter().enumerate() {
            groups.entry(label).or_default().push(seeds[seed]);
        }

        let mut candidates: Vec<Domain> = groups
            .into_values()
            .map(|pairs| build_domain(&pairs))
            .collect();
        let before = candidates.len();
        candidates.retain(|d| d.len() >= self.min_domain_size.max(1));
        let trimmed = before - candidates.len();

        // content order: smallest node, then representative, then attribute list
        candidates.sort_by(|a, b| {
            a.nodes[0].cmp(&b.nodes[0])
                .then(a.representative.cmp(&b.representative))
                .then_with(|| a.attributes.cmp(&b.attributes))
                .then_with(|| a.nodes.cmp(&b.nodes))
        });

        let mut membership: Vec<DomainSet> = vec![SmallVec::new(); rows];
        let mut contributions: Vec<SmallVec<[(DomainId, usize); 2]>> = vec![SmallVec::new(); rows];
        for (i, domain) in candidates.iter_mut().enumerate() {
            domain.id = DomainId(i as u32);
            for &v in &domain.nodes {
                membership[v].push(domain.id);
                let held = node_attrs[v].iter().filter(|&&a| domain.has_attribute(a)).count();
                contributions[v].push((domain.id, held));
            }
        }

        debug!(
            seeds = seeds.len(),
            domains = candidates.len(),
            trimmed,
            "Domain consolidation finished"
        );

        Ok(Domains { domains: candidates, membership, contributions, trimmed })
    }
}

/// Consolidate with default settings apart from the overlap threshold.
pub fn consolidate(network: &Network, significance: &Significance, overlap_threshold: f64) -> Result<Domains> {
    DomainConsolidator::new(overlap_threshold).consolidate(network, significance, &[], None)
}

fn build_domain(pairs: &[(usize, usize)]) -> Domain {
    let mut nodes: Vec<usize> = pairs.iter().map(|(v, _)| *v).collect();
    nodes.sort_unstable();
    nodes.dedup();

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &(_, a) in pairs {
        *counts.entry(a).or_default() += 1;
    }
    let mut attributes: Vec<(usize, usize)> = counts.into_iter().collect();
    attributes.sort_unstable();

    let representative = attributes
        .iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then(b.cmp(a)))
        .map_or(0, |(a, _)| *a);

    Domain { id: DomainId(0), nodes, attributes, representative }
}

/// |A ∩ B| / |A ∪ B| over sorted slices; 0 for two empty sets.
fn jaccard(a: &[usize], b: &[usize]) -> f64 {
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    let union = a.len() + b.len() - shared;
    if union == 0 { 0.0 } else { shared as f64 / union as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Matrix, Node, NodeId};
    use crate::significance::{Correction, NegLog10, SignificanceEvaluator, Tail};
    use pretty_assertions::assert_eq;

    fn path(n: u64) -> Network {
        let nodes = (0..n).map(|i| Node::new(NodeId(i))).collect();
        let edges = (1..n).map(|i| Edge::new(NodeId(i - 1), NodeId(i))).collect();
        Network::new(nodes, edges).unwrap()
    }

    /// Significance where `enriched[v]` lists node v's enriched attributes.
    fn calls(cols: usize, enriched: &[&[usize]]) -> Significance {
        let rows = enriched.len();
        let mut right = Matrix::filled(rows, cols, Some(NegLog10::from_p(0.5).unwrap()));
        for (v, attrs) in enriched.iter().enumerate() {
            for &a in *attrs {
                right.set(v, a, Some(NegLog10::from_p(0.001).unwrap()));
            }
        }
        SignificanceEvaluator::new(Tail::Right, Correction::None, 0.05)
            .evaluate_p_values(right, Matrix::filled(rows, cols, None))
            .unwrap()
    }

    fn node_sets(d: &Domains) -> Vec<Vec<usize>> {
        d.domains.iter().map(|x| x.nodes.clone()).collect()
    }

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard(&[1, 2, 3], &[2, 3, 4]), 0.5);
        assert_eq!(jaccard(&[], &[]), 0.0);
        assert_eq!(jaccard(&[7], &[7]), 1.0);
    }

    #[test]
    fn adjacent_overlapping_nodes_merge() {
        let net = path(6);
        let sig = calls(2, &[&[0], &[0], &[0, 1], &[], &[1], &[1]]);
        let domains = consolidate(&net, &sig, 0.4).unwrap();
        // 1–2 overlap is 1/2, 2–3 not adjacent-enriched, 4–5 overlap 1
        assert_eq!(node_sets(&domains), vec![vec![0, 1, 2], vec![4, 5]]);
        assert_eq!(domains.domains[0].representative, 0);
        assert_eq!(domains.domains[1].representative, 1);
        assert_eq!(domains.of_node(3), &[] as &[DomainId]);
    }

    #[test]
    fn overlap_equal_to_threshold_keeps_seeds_apart() {
        let net = path(2);
        // {0} vs {0, 1}: Jaccard exactly 1/2
        let sig = calls(2, &[&[0], &[0, 1]]);
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        assert_eq!(node_sets(&domains), vec![vec![0], vec![1]]);
        assert_eq!(consolidate(&net, &sig, 0.49).unwrap().len(), 1);
    }

    #[test]
    fn low_overlap_keeps_seeds_apart() {
        let net = path(3);
        let sig = calls(3, &[&[0], &[0, 1, 2], &[2]]);
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        assert_eq!(node_sets(&domains), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn dissimilar_attributes_give_overlapping_domains() {
        let net = path(5);
        // attribute 0 on 0..=2, attribute 1 on 2..=4; node 2 holds both
        let sig = calls(2, &[&[0], &[0], &[0, 1], &[1], &[1]]);
        let domains = DomainConsolidator::new(0.0)
            .attribute_similarity(0.5)
            .consolidate(&net, &sig, &[], None)
            .unwrap();
        assert_eq!(node_sets(&domains), vec![vec![0, 1, 2], vec![2, 3, 4]]);
        assert_eq!(domains.of_node(2), &[DomainId(0), DomainId(1)]);
    }

    #[test]
    fn representative_ties_break_to_lowest_attribute() {
        let net = path(2);
        let sig = calls(4, &[&[1, 3], &[1, 3]]);
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains.domains[0].representative, 1);
        assert_eq!(domains.domains[0].attributes, vec![(1, 2), (3, 2)]);
    }

    #[test]
    fn trimming_renumbers_densely() {
        let net = path(6);
        let sig = calls(2, &[&[0], &[], &[1], &[1], &[1], &[]]);
        let domains = DomainConsolidator::new(0.5)
            .min_domain_size(2)
            .consolidate(&net, &sig, &[], None)
            .unwrap();
        assert_eq!(domains.trimmed, 1);
        assert_eq!(domains.domains[0].id, DomainId(0));
        assert_eq!(domains.domains[0].nodes, vec![2, 3, 4]);
        assert!(domains.of_node(0).is_empty());
    }

    #[test]
    fn ineligible_attributes_are_ignored() {
        let net = path(3);
        let sig = calls(2, &[&[0, 1], &[0, 1], &[]]);
        let domains = DomainConsolidator::new(0.5)
            .consolidate(&net, &sig, &[false, true], None)
            .unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains.domains[0].attributes, vec![(1, 2)]);
    }

    #[test]
    fn primary_domain_prefers_most_attributes() {
        let net = path(5);
        let sig = calls(3, &[&[0], &[0], &[0, 1, 2], &[1, 2], &[1, 2]]);
        let domains = DomainConsolidator::new(0.0)
            .attribute_similarity(0.5)
            .consolidate(&net, &sig, &[], None)
            .unwrap();
        let primary = domains.primary(&sig);
        let d12 = domains.domains.iter().find(|d| d.has_attribute(1)).unwrap().id;
        assert_eq!(primary[2].unwrap().domain, d12);
        assert!(primary[2].unwrap().score > 2.0);
    }

    #[test]
    fn neighborhood_proximity_bridges_gaps() {
        let net = path(3);
        let sig = calls(1, &[&[0], &[], &[0]]);
        assert_eq!(consolidate(&net, &sig, 0.5).unwrap().len(), 2);

        let hoods = Neighborhoods::from_members(vec![vec![0, 1, 2], vec![0, 1, 2], vec![0, 1, 2]]);
        let consolidator = DomainConsolidator::new(0.5).proximity(Proximity::Neighborhood);
        let domains = consolidator.consolidate(&net, &sig, &[], Some(&hoods)).unwrap();
        assert_eq!(node_sets(&domains), vec![vec![0, 2]]);

        let err = consolidator.consolidate(&net, &sig, &[], None);
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let net = path(2);
        let sig = calls(1, &[&[0], &[0]]);
        assert!(matches!(consolidate(&net, &sig, 1.5), Err(Error::Configuration(_))));
    }
}
