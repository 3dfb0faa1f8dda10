//! # Result bundle
//!
//! Read-only output of a run, shaped for serialization and for an
//! external plotting or reporting layer. Assembly validates shapes and
//! resolves dense indices to external ids and names; it computes nothing
//! beyond the per-node primary domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::aggregate::Scores;
use crate::config::EnrichmentTest;
use crate::domain::{AttributeFootprint, DomainId, DomainSet, Domains, PrimaryDomain};
use crate::model::{AttributeId, AttributeMatrix, Degeneracy, Matrix, Network, NodeId};
use crate::significance::{Call, Significance};
use crate::{Error, Result};

/// One row of the domain table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub id: DomainId,
    pub representative: AttributeId,
    /// Name of the representative attribute.
    pub label: String,
    pub nodes: Vec<NodeId>,
    pub attributes: Vec<AttributeId>,
}

/// One row of the attribute table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSummary {
    pub id: AttributeId,
    pub name: String,
    pub enriched_nodes: usize,
    pub depleted_nodes: usize,
    pub components: usize,
    /// Passed the attribute filter and took part in domain building.
    pub eligible: bool,
    pub domains: SmallVec<[DomainId; 2]>,
    pub degeneracy: Option<Degeneracy>,
}

/// An attribute that was skipped as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegenerateAttribute {
    pub attribute: AttributeId,
    pub name: String,
    pub reason: Degeneracy,
}

/// How the numbers were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub test: EnrichmentTest,
    /// Zero for the analytic test.
    pub permutations: usize,
    pub seed: u64,
    pub degenerate: Vec<DegenerateAttribute>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub node_ids: Vec<NodeId>,
    pub node_labels: Vec<String>,
    pub attributes: Vec<AttributeSummary>,
    pub observed: Scores,
    pub significance: Significance,
    /// Signed `-log10` corrected p: positive for enrichment, negative for
    /// depletion, `None` where not testable.
    pub scores: Matrix<Option<f64>>,
    pub domains: Vec<DomainSummary>,
    pub node_domains: Vec<DomainSet>,
    pub primary_domains: Vec<Option<PrimaryDomain>>,
    pub report: RunReport,
}

impl EnrichmentResult {
    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn call(&self, node: usize, attribute: usize) -> Call {
        self.significance.call(node, attribute)
    }

    pub fn score(&self, node: usize, attribute: usize) -> Option<f64> {
        *self.scores.get(node, attribute)
    }

    /// Domains of a node; empty when it belongs to none.
    pub fn domains_of(&self, node: usize) -> &[DomainId] {
        &self.node_domains[node]
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Assembler
// ============================================================================

/// Joins the stage outputs of one run into an [`EnrichmentResult`].
pub struct ResultAssembler<'a> {
    network: &'a Network,
    attributes: &'a AttributeMatrix,
    footprints: &'a [AttributeFootprint],
}

impl<'a> ResultAssembler<'a> {
    pub fn new(network: &'a Network, attributes: &'a AttributeMatrix) -> Self {
        Self { network, attributes, footprints: &[] }
    }

    /// Attribute-filter outcome, one entry per attribute.
    pub fn footprints(mut self, footprints: &'a [AttributeFootprint]) -> Self {
        self.footprints = footprints;
        self
    }

    pub fn assemble(
        &self,
        observed: Scores,
        significance: Significance,
        domains: &Domains,
        report: RunReport,
    ) -> Result<EnrichmentResult> {
        let shape = (self.attributes.node_count(), self.attributes.attribute_count());
        let (rows, cols) = shape;
        if self.network.len() != rows {
            return Err(Error::Alignment(format!(
                "Network has {} nodes, attribute matrix {rows}", self.network.len()
            )));
        }
        if observed.shape() != shape || significance.shape() != shape {
            return Err(Error::Alignment(format!(
                "Observed {:?} and significance {:?} must both be {shape:?}",
                observed.shape(), significance.shape()
            )));
        }
        if domains.membership.len() != rows {
            return Err(Error::Alignment(format!(
                "Domain membership covers {} nodes, expected {rows}", domains.membership.len()
            )));
        }
        if !self.footprints.is_empty() && self.footprints.len() != cols {
            return Err(Error::Alignment(format!(
                "{} attribute footprints for {cols} attributes", self.footprints.len()
            )));
        }
        for d in &domains.domains {
            if d.nodes.iter().any(|&v| v >= rows) || d.attributes.iter().any(|&(a, _)| a >= cols) {
                return Err(Error::Alignment(format!("Domain {} references unknown indices", d.id)));
            }
        }

        let node_ids = self.attributes.node_ids().to_vec();
        let node_labels = self.network.nodes().iter().map(|n| n.label.clone()).collect();

        let domain_table: Vec<DomainSummary> = domains.domains
            .iter()
            .map(|d| DomainSummary {
                id: d.id,
                representative: AttributeId(d.representative as u32),
                label: self.attributes.attributes()[d.representative].name.clone(),
                nodes: d.nodes.iter().map(|&v| node_ids[v]).collect(),
                attributes: d.attributes.iter().map(|&(a, _)| AttributeId(a as u32)).collect(),
            })
            .collect();

        let attribute_table = self.attributes.attributes()
            .iter()
            .enumerate()
            .map(|(col, attr)| {
                let footprint = self.footprints.get(col);
                let count = |call| significance.calls.column(col).filter(|c| **c == call).count();
                AttributeSummary {
                    id: attr.id,
                    name: attr.name.clone(),
                    enriched_nodes: count(Call::Enriched),
                    depleted_nodes: count(Call::Depleted),
                    components: footprint.map_or(0, |f| f.components),
                    eligible: footprint.is_none_or(|f| f.eligible),
                    domains: domains.domains.iter()
                        .filter(|d| d.has_attribute(col))
                        .map(|d| d.id)
                        .collect(),
                    degeneracy: report.degenerate.iter()
                        .find(|x| x.attribute == attr.id)
                        .map(|x| x.reason),
                }
            })
            .collect();

        let primary_domains = domains.primary(&significance);
        let scores = significance.signed_scores();

        Ok(EnrichmentResult {
            node_ids,
            node_labels,
            attributes: attribute_table,
            observed,
            significance,
            scores,
            domains: domain_table,
            node_domains: domains.membership.clone(),
            primary_domains,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::consolidate;
    use crate::model::{Edge, Node};
    use crate::significance::{Correction, NegLog10, SignificanceEvaluator, Tail};

    fn fixture() -> (Network, AttributeMatrix, Significance) {
        let nodes = (0..3).map(|i| Node::new(NodeId(10 + i)).with_label(format!("g{i}"))).collect();
        let edges = vec![Edge::new(NodeId(10), NodeId(11)), Edge::new(NodeId(11), NodeId(12))];
        let net = Network::new(nodes, edges).unwrap();
        let attrs = AttributeMatrix::from_rows(
            (10..13).map(NodeId).collect(),
            vec!["go:1".into()],
            vec![vec![Some(1.0)], vec![Some(1.0)], vec![Some(0.0)]],
        ).unwrap();
        let p = |x| Some(NegLog10::from_p(x).unwrap());
        let sig = SignificanceEvaluator::new(Tail::Right, Correction::None, 0.05)
            .evaluate_p_values(
                Matrix::from_vec(3, 1, vec![p(0.01), p(0.02), p(0.7)]).unwrap(),
                Matrix::filled(3, 1, None),
            )
            .unwrap();
        (net, attrs, sig)
    }

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            test: EnrichmentTest::Permutation,
            permutations: 100,
            seed: 0,
            degenerate: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn resolves_ids_and_names() {
        let (net, attrs, sig) = fixture();
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        let observed = Matrix::filled(3, 1, Some(1.0));
        let result = ResultAssembler::new(&net, &attrs)
            .assemble(observed, sig, &domains, report())
            .unwrap();

        assert_eq!(result.domains.len(), 1);
        assert_eq!(result.domains[0].label, "go:1");
        assert_eq!(result.domains[0].nodes, vec![NodeId(10), NodeId(11)]);
        assert_eq!(result.domains_of(1), &[DomainId(0)]);
        assert!(result.domains_of(2).is_empty());
        assert_eq!(result.attributes[0].enriched_nodes, 2);
        assert_eq!(result.node_labels[2], "g2");
        assert!((result.score(0, 0).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(result.primary_domains[0].unwrap().domain, DomainId(0));
        assert_eq!(result.primary_domains[2], None);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let (net, attrs, sig) = fixture();
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        let err = ResultAssembler::new(&net, &attrs)
            .assemble(Matrix::filled(2, 1, None), sig, &domains, report());
        assert!(matches!(err, Err(Error::Alignment(_))));
    }

    #[test]
    fn json_round_trip_keeps_not_testable() {
        let (net, attrs, _) = fixture();
        let sig = SignificanceEvaluator::default()
            .evaluate_p_values(Matrix::filled(3, 1, None), Matrix::filled(3, 1, None))
            .unwrap();
        let domains = consolidate(&net, &sig, 0.5).unwrap();
        let result = ResultAssembler::new(&net, &attrs)
            .assemble(Matrix::filled(3, 1, None), sig, &domains, report())
            .unwrap();
        let back = EnrichmentResult::from_json(&result.to_json().unwrap()).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.call(0, 0), Call::NotTestable);
    }
}
