//! # Neighborhoods
//!
//! For every node, the set of nodes within a radius of it, by hop count,
//! by layout distance, or by edge-length shortest path. Built once per run
//! and immutable afterwards; the null model reuses them for every
//! permutation.
//!
//! Storage is CSR: one flat member array plus per-node offsets, with
//! distances (and optional weights) aligned to the members.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::Network;
use crate::{Error, Result};

// ============================================================================
// Configuration
// ============================================================================

/// How distance between two nodes is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Breadth-first hop count over the edges.
    #[default]
    HopDistance,
    /// Straight-line distance between layout positions.
    Euclidean,
    /// Dijkstra over edge lengths (explicit length, else layout distance).
    WeightedShortestPath,
}

/// How `radius` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusScale {
    #[default]
    Absolute,
    /// `radius` is a fraction of the layout's x-extent. Only meaningful for
    /// the layout-based metrics.
    LayoutFraction,
}

/// Per-member weights carried by each neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// No weights; weighted aggregation is unavailable.
    Uniform,
    /// `1 / (1 + distance)`.
    #[default]
    InverseDistance,
}

/// Builder for [`Neighborhoods`].
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodBuilder {
    pub radius: f64,
    pub scale: RadiusScale,
    pub metric: DistanceMetric,
    pub include_self: bool,
    pub weighting: Weighting,
}

impl Default for NeighborhoodBuilder {
    fn default() -> Self {
        Self {
            radius: 1.0,
            scale: RadiusScale::Absolute,
            metric: DistanceMetric::HopDistance,
            include_self: true,
            weighting: Weighting::InverseDistance,
        }
    }
}

impl NeighborhoodBuilder {
    pub fn new(radius: f64, metric: DistanceMetric) -> Self {
        Self { radius, metric, ..Self::default() }
    }

    pub fn with_scale(mut self, scale: RadiusScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn include_self(mut self, include: bool) -> Self {
        self.include_self = include;
        self
    }

    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Reject radii and metric combinations that cannot be built.
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(Error::Configuration(format!(
                "Neighborhood radius must be a positive number, got {}", self.radius
            )));
        }
        match (self.metric, self.scale) {
            (DistanceMetric::HopDistance, RadiusScale::LayoutFraction) => Err(Error::Configuration(
                "Hop-distance neighborhoods cannot use a layout-fraction radius".into(),
            )),
            (DistanceMetric::HopDistance, _) if self.radius < 1.0 => Err(Error::Configuration(format!(
                "Hop-distance radius must be at least 1, got {}", self.radius
            ))),
            _ => Ok(()),
        }
    }

    /// Compute every node's neighborhood.
    pub fn build(&self, network: &Network) -> Result<Neighborhoods> {
        self.validate()?;

        let radius = match self.scale {
            RadiusScale::Absolute => self.radius,
            RadiusScale::LayoutFraction => self.radius * network.layout_extent_x(),
        };

        let per_node: Vec<Vec<(usize, f64)>> = (0..network.len())
            .into_par_iter()
            .map(|source| {
                let mut reached = match self.metric {
                    DistanceMetric::HopDistance => hop_ball(network, source, radius.floor() as usize),
                    DistanceMetric::Euclidean => euclidean_ball(network, source, radius),
                    DistanceMetric::WeightedShortestPath => dijkstra_ball(network, source, radius),
                };
                if !self.include_self {
                    reached.retain(|&(v, _)| v != source);
                }
                reached.sort_by_key(|&(v, _)| v);
                reached
            })
            .collect();

        let mut offsets = Vec::with_capacity(network.len() + 1);
        let mut members = Vec::new();
        let mut distances = Vec::new();
        offsets.push(0);
        for list in per_node {
            for (v, d) in list {
                members.push(v);
                distances.push(d);
            }
            offsets.push(members.len());
        }

        let weights = match self.weighting {
            Weighting::Uniform => None,
            Weighting::InverseDistance => Some(distances.iter().map(|d| 1.0 / (1.0 + d)).collect()),
        };

        let hoods = Neighborhoods { offsets, members, distances, weights };
        let (mean, std) = hoods.size_stats();
        info!(
            metric = ?self.metric,
            radius,
            "Neighborhoods built: {:.2} ± {:.2} nodes per neighborhood",
            mean, std,
        );
        Ok(hoods)
    }
}

// ============================================================================
// Neighborhoods
// ============================================================================

/// All neighborhoods of a network, indexed by dense node index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhoods {
    offsets: Vec<usize>,
    members: Vec<usize>,
    distances: Vec<f64>,
    weights: Option<Vec<f64>>,
}

/// Borrowed view of one node's neighborhood. Members are ascending.
#[derive(Debug, Clone, Copy)]
pub struct Neighborhood<'a> {
    pub members: &'a [usize],
    pub distances: &'a [f64],
    pub weights: Option<&'a [f64]>,
}

impl Neighborhood<'_> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.members.binary_search(&node).is_ok()
    }
}

impl Neighborhoods {
    /// Assemble from explicit member lists (sorted and de-duplicated here).
    /// Distances default to 0 and no weights are attached.
    pub fn from_members(lists: Vec<Vec<usize>>) -> Self {
        let mut offsets = vec![0];
        let mut members = Vec::new();
        for mut list in lists {
            list.sort_unstable();
            list.dedup();
            members.extend(list);
            offsets.push(members.len());
        }
        let distances = vec![0.0; members.len()];
        Self { offsets, members, distances, weights: None }
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_weights(&self) -> bool {
        self.weights.is_some()
    }

    pub fn get(&self, node: usize) -> Neighborhood<'_> {
        let range = self.offsets[node]..self.offsets[node + 1];
        Neighborhood {
            members: &self.members[range.clone()],
            distances: &self.distances[range.clone()],
            weights: self.weights.as_deref().map(|w| &w[range]),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Neighborhood<'_>> + '_ {
        (0..self.len()).map(|v| self.get(v))
    }

    /// Whether `b` lies in `a`'s neighborhood.
    pub fn contains(&self, a: usize, b: usize) -> bool {
        self.get(a).contains(b)
    }

    /// Mean and population standard deviation of neighborhood sizes.
    pub fn size_stats(&self) -> (f64, f64) {
        let n = self.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let sizes: Vec<f64> = self.iter().map(|h| h.len() as f64).collect();
        let mean = sizes.iter().sum::<f64>() / n as f64;
        let var = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        (mean, var.sqrt())
    }
}

// ============================================================================
// Traversals
// ============================================================================

/// BFS up to `max_hops`; every node at the boundary hop is included.
fn hop_ball(network: &Network, source: usize, max_hops: usize) -> Vec<(usize, f64)> {
    let mut depth = vec![usize::MAX; network.len()];
    let mut queue = VecDeque::new();
    let mut reached = Vec::new();

    depth[source] = 0;
    queue.push_back(source);
    while let Some(v) = queue.pop_front() {
        reached.push((v, depth[v] as f64));
        if depth[v] == max_hops {
            continue;
        }
        for &w in network.neighbors(v) {
            if depth[w] == usize::MAX {
                depth[w] = depth[v] + 1;
                queue.push_back(w);
            }
        }
    }
    reached
}

fn euclidean_ball(network: &Network, source: usize, radius: f64) -> Vec<(usize, f64)> {
    let origin = network.node(source);
    network.nodes()
        .iter()
        .enumerate()
        .filter_map(|(v, node)| {
            let d = origin.layout_distance(node);
            (d <= radius).then_some((v, d))
        })
        .collect()
}

#[derive(Debug, PartialEq)]
struct Frontier {
    dist: f64,
    node: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on distance, ties on node index
        other.dist.total_cmp(&self.dist).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra from `source`, stopping at `cutoff` (inclusive).
fn dijkstra_ball(network: &Network, source: usize, cutoff: f64) -> Vec<(usize, f64)> {
    let mut best = vec![f64::INFINITY; network.len()];
    let mut settled = vec![false; network.len()];
    let mut heap = BinaryHeap::new();
    let mut reached = Vec::new();

    best[source] = 0.0;
    heap.push(Frontier { dist: 0.0, node: source });
    while let Some(Frontier { dist, node }) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        reached.push((node, dist));

        for (&w, &len) in network.neighbors(node).iter().zip(network.neighbor_lengths(node)) {
            let next = dist + len;
            if next <= cutoff && next < best[w] {
                best[w] = next;
                heap.push(Frontier { dist: next, node: w });
            }
        }
    }
    reached
}
