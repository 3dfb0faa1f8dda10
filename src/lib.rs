//! # safe-rs: Spatial Analysis of Functional Enrichment
//!
//! Finds regions of a network that are over-represented for node
//! attributes, and groups them into functional domains.
//!
//! ## Design Principles
//!
//! 1. **Dense indices**: nodes and attributes are integer positions; every
//!    per-(node, attribute) quantity is a flat [`Matrix`]
//! 2. **One kernel**: observed scores and every permutation go through the
//!    same aggregation code
//! 3. **Deterministic**: each permutation has its own seeded stream, so
//!    thread count never changes a number
//! 4. **Not testable is not "not significant"**: degenerate data is carried
//!    as its own call all the way to the output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use safe_rs::{AttributeMatrix, Edge, Network, Node, NodeId, Safe, SafeConfig};
//!
//! # fn example() -> safe_rs::Result<()> {
//! let nodes = (0..4).map(|i| Node::new(NodeId(i))).collect();
//! let edges = vec![
//!     Edge::new(NodeId(0), NodeId(1)),
//!     Edge::new(NodeId(1), NodeId(2)),
//!     Edge::new(NodeId(2), NodeId(3)),
//! ];
//! let network = Network::new(nodes, edges)?;
//! let attributes = AttributeMatrix::from_rows(
//!     (0..4).map(NodeId).collect(),
//!     vec!["ribosome".into()],
//!     vec![vec![Some(1.0)], vec![Some(1.0)], vec![Some(0.0)], vec![Some(0.0)]],
//! )?;
//!
//! let safe = Safe::new(SafeConfig::default())?;
//! let result = safe.run(&network, &attributes)?;
//! for domain in &result.domains {
//!     println!("domain {}: {} ({} nodes)", domain.id, domain.label, domain.nodes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Phase | Module | Output |
//! |-------|--------|--------|
//! | Neighborhoods | [`neighborhood`] | member lists per node |
//! | Scoring | [`aggregate`] | observed score matrix |
//! | Null model | [`null_model`] | exceedance counts per pair |
//! | Significance | [`significance`] | p-values and calls |
//! | Domains | [`domain`] | consolidated domains |
//! | Assembly | [`result`] | [`EnrichmentResult`] |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod neighborhood;
pub mod aggregate;
pub mod null_model;
pub mod significance;
pub mod domain;
pub mod result;
pub mod config;
pub mod export;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    Node, NodeId, Edge, Network,
    Attribute, AttributeId, AttributeMatrix, Degeneracy, Matrix,
};

// ============================================================================
// Re-exports: Pipeline stages
// ============================================================================

pub use neighborhood::{DistanceMetric, NeighborhoodBuilder, Neighborhoods, RadiusScale, Weighting};
pub use aggregate::{AggregationRule, Scores, aggregate};
pub use null_model::{CancellationToken, NullDistribution, NullModelEngine, NullTally, generate_null};
pub use significance::{
    Call, Correction, CorrectionScope, NegLog10, Significance, SignificanceEvaluator, Tail,
};
pub use domain::{
    AttributeFilter, Domain, DomainConsolidator, DomainId, Domains, PrimaryDomain, Proximity,
    consolidate,
};
pub use result::{EnrichmentResult, ResultAssembler, RunReport};
pub use config::{EnrichmentTest, SafeConfig};

use chrono::Utc;
use tracing::{info, warn};

use crate::result::DegenerateAttribute;

// ============================================================================
// Top-level Safe handle
// ============================================================================

/// The primary entry point. A `Safe` holds a validated configuration and
/// runs the full pipeline over a network and its attributes.
#[derive(Debug, Clone)]
pub struct Safe {
    config: SafeConfig,
}

impl Safe {
    /// Validate `config`; no computation happens with a bad configuration.
    pub fn new(config: SafeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SafeConfig {
        &self.config
    }

    /// Run every phase to completion.
    pub fn run(&self, network: &Network, attributes: &AttributeMatrix) -> Result<EnrichmentResult> {
        self.run_with_cancel(network, attributes, &CancellationToken::new())
    }

    /// Run with a cancellation flag, checked between permutation batches
    /// and between phases.
    pub fn run_with_cancel(
        &self,
        network: &Network,
        attributes: &AttributeMatrix,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentResult> {
        let cfg = &self.config;
        let started_at = Utc::now();

        // Phase 0: Validate inputs
        attributes.check_alignment(network)?;
        info!(
            nodes = network.len(),
            edges = network.edge_count(),
            attributes = attributes.attribute_count(),
            "Starting enrichment run"
        );

        let mut degenerate = Vec::new();
        let mut untestable = vec![false; attributes.attribute_count()];
        for (col, attr) in attributes.attributes().iter().enumerate() {
            match attributes.check_column(col) {
                Ok(()) => {}
                Err(Error::DegenerateInput { attribute, reason: why }) => {
                    warn!(%attribute, reason = %why, "Degenerate attribute marked not testable");
                    untestable[col] = true;
                    if let Some(reason) = attributes.degeneracy(col) {
                        degenerate.push(DegenerateAttribute { attribute: attr.id, name: attr.name.clone(), reason });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        // Phase 1: Neighborhoods
        let hoods = cfg.neighborhoods().build(network)?;

        // Phase 2: Observed scores
        let observed = aggregate(attributes, &hoods, cfg.aggregation_rule)?;
        info!(rule = ?cfg.aggregation_rule, "Observed scores computed");
        check_cancel(cancel, 0, cfg.permutations)?;

        // Phase 3: Null model and significance
        let evaluator = cfg.significance();
        let (significance, permutations) = match cfg.test {
            EnrichmentTest::Permutation => {
                let tally = NullModelEngine::new(attributes, &hoods, cfg.aggregation_rule)
                    .permutations(cfg.permutations)
                    .seed(cfg.seed)
                    .batch_size(cfg.batch_size)
                    .tally(&observed, Some(cancel))?;
                info!(permutations = tally.permutations, seed = cfg.seed, "Null model finished");
                (evaluator.evaluate_tally(&observed, &tally, &untestable)?, tally.permutations)
            }
            EnrichmentTest::Hypergeometric => {
                let (right, left) =
                    crate::significance::hypergeometric_p_values(attributes, &hoods, cfg.tail, &untestable)?;
                (evaluator.evaluate_p_values(right, left)?, 0)
            }
        };
        let enriched: usize = significance.enriched_counts().iter().sum();
        info!(
            enriched_pairs = enriched,
            correction = ?cfg.correction,
            scope = ?cfg.correction_scope,
            alpha = cfg.alpha,
            "Significance evaluated"
        );
        check_cancel(cancel, permutations, permutations)?;

        // Phase 4: Attribute filter and domains
        let footprints = cfg.attribute_filter().apply(network, &significance)?;
        let eligible: Vec<bool> = footprints.iter().map(|f| f.eligible).collect();
        info!(
            eligible = eligible.iter().filter(|e| **e).count(),
            attributes = eligible.len(),
            "Attribute filter applied"
        );
        let domains = cfg.consolidator().consolidate(network, &significance, &eligible, Some(&hoods))?;
        info!(domains = domains.len(), trimmed = domains.trimmed, "Domains consolidated");

        // Phase 5: Assemble
        let report = RunReport {
            test: cfg.test,
            permutations,
            seed: cfg.seed,
            degenerate,
            started_at,
            finished_at: Utc::now(),
        };
        ResultAssembler::new(network, attributes)
            .footprints(&footprints)
            .assemble(observed, significance, &domains, report)
    }
}

fn check_cancel(cancel: &CancellationToken, completed: usize, requested: usize) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled { completed, requested });
    }
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Degenerate attribute '{attribute}': {reason}")]
    DegenerateInput { attribute: String, reason: String },

    #[error("Numeric overflow: {0}")]
    NumericOverflow(String),

    #[error("Cancelled after {completed} of {requested} permutations")]
    Cancelled { completed: usize, requested: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "arrow-results")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

pub type Result<T> = std::result::Result<T, Error>;
