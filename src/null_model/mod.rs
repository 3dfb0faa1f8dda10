//! # Permutation null model
//!
//! Builds the empirical null for every (node, attribute) pair by
//! reassigning attribute rows to random nodes and re-running the
//! aggregation kernel over the fixed neighborhoods.
//!
//! ## Determinism
//!
//! Permutation `k` draws from its own ChaCha8 stream (`seed`, stream `k`),
//! so the result is bit-identical regardless of thread count or the order
//! in which rayon schedules permutations.
//!
//! ## Cost
//!
//! Permutations run in batches of `batch_size`; each batch is spread over
//! the rayon pool with thread-local scratch. The cancellation token is
//! checked between batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{AggregationRule, Accumulator, Scores, aggregate_into};
use crate::model::{AttributeMatrix, Matrix};
use crate::neighborhood::Neighborhoods;
use crate::{Error, Result};

/// Relative tolerance for treating a null sample as tied with the observed
/// score.
pub const TIE_TOLERANCE: f64 = 1e-10;

/// Default number of permutations per batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared with a running engine.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Permutation engine over fixed inputs.
pub struct NullModelEngine<'a> {
    attributes: &'a AttributeMatrix,
    neighborhoods: &'a Neighborhoods,
    rule: AggregationRule,
    permutations: usize,
    seed: u64,
    batch_size: usize,
}

impl<'a> NullModelEngine<'a> {
    pub fn new(
        attributes: &'a AttributeMatrix,
        neighborhoods: &'a Neighborhoods,
        rule: AggregationRule,
    ) -> Self {
        Self {
            attributes,
            neighborhoods,
            rule,
            permutations: 1000,
            seed: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn permutations(mut self, permutations: usize) -> Self {
        self.permutations = permutations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.permutations == 0 {
            return Err(Error::Configuration("At least one permutation is required".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Configuration("Permutation batch size must be positive".into()));
        }
        if self.neighborhoods.len() != self.attributes.node_count() {
            return Err(Error::Alignment(format!(
                "{} neighborhoods for {} attribute rows",
                self.neighborhoods.len(), self.attributes.node_count()
            )));
        }
        self.rule.validate(self.neighborhoods)
    }

    /// Row map for permutation `index`: node `v` carries attribute row
    /// `map[v]`.
    pub fn permutation(&self, index: usize) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index as u64);
        let mut map: Vec<usize> = (0..self.attributes.node_count()).collect();
        map.shuffle(&mut rng);
        map
    }

    /// Columns with nothing to permute: all missing or a single value.
    fn degenerate_columns(&self) -> Vec<bool> {
        (0..self.attributes.attribute_count())
            .map(|col| self.attributes.degeneracy(col).is_some())
            .collect()
    }

    fn scratch(&self) -> (Accumulator, Scores) {
        let (rows, cols) = (self.attributes.node_count(), self.attributes.attribute_count());
        (Accumulator::new(cols), Matrix::filled(rows, cols, None))
    }

    fn run_permutation(&self, index: usize, acc: &mut Accumulator, out: &mut Scores) {
        let map = self.permutation(index);
        aggregate_into(self.attributes.values(), self.neighborhoods, self.rule, &map, acc, out);
    }

    /// Run batches in order, handing each permutation range to `per_batch`.
    fn for_each_batch(
        &self,
        cancel: Option<&CancellationToken>,
        mut per_batch: impl FnMut(std::ops::Range<usize>),
    ) -> Result<()> {
        let mut done = 0;
        while done < self.permutations {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Cancelled { completed: done, requested: self.permutations });
            }
            let end = (done + self.batch_size).min(self.permutations);
            per_batch(done..end);
            done = end;
            debug!(completed = done, requested = self.permutations, "Null model batch finished");
        }
        Ok(())
    }

    /// Materialise every null sample.
    pub fn generate(&self, cancel: Option<&CancellationToken>) -> Result<NullDistribution> {
        self.validate()?;
        let (rows, cols) = (self.attributes.node_count(), self.attributes.attribute_count());
        let p = self.permutations;
        let mut samples = vec![None; rows * cols * p];

        self.for_each_batch(cancel, |batch| {
            let start = batch.start;
            let scored: Vec<Scores> = batch
                .into_par_iter()
                .map_init(
                    || self.scratch(),
                    |(acc, out), k| {
                        self.run_permutation(k, acc, out);
                        out.clone()
                    },
                )
                .collect();
            for (offset, scores) in scored.iter().enumerate() {
                for (pair, value) in scores.as_slice().iter().enumerate() {
                    samples[pair * p + start + offset] = *value;
                }
            }
        })?;

        Ok(NullDistribution {
            rows,
            cols,
            permutations: p,
            samples,
            degenerate: self.degenerate_columns(),
        })
    }

    /// Stream the permutations and keep only the exceedance counts against
    /// `observed`. Same numbers as `generate(..)?.tally(observed)` without
    /// holding the samples.
    pub fn tally(&self, observed: &Scores, cancel: Option<&CancellationToken>) -> Result<NullTally> {
        self.validate()?;
        let (rows, cols) = (self.attributes.node_count(), self.attributes.attribute_count());
        if observed.shape() != (rows, cols) {
            return Err(Error::Alignment(format!(
                "Observed scores have shape {:?}, expected ({rows}, {cols})", observed.shape()
            )));
        }

        let mut total = NullTally::new(rows * cols);
        self.for_each_batch(cancel, |batch| {
            let partial = batch
                .into_par_iter()
                .fold(
                    || (NullTally::new(rows * cols), self.scratch()),
                    |(mut tally, (mut acc, mut out)), k| {
                        self.run_permutation(k, &mut acc, &mut out);
                        tally.record(observed.as_slice(), out.as_slice());
                        (tally, (acc, out))
                    },
                )
                .map(|(tally, _)| tally)
                .reduce(|| NullTally::new(rows * cols), NullTally::merge);
            total = std::mem::replace(&mut total, NullTally::new(0)).merge(partial);
        })?;

        total.permutations = self.permutations;
        total.degenerate = self.degenerate_columns();
        Ok(total)
    }
}

/// Generate the full null distribution in one call.
pub fn generate_null(
    attributes: &AttributeMatrix,
    neighborhoods: &Neighborhoods,
    rule: AggregationRule,
    permutations: usize,
    seed: u64,
) -> Result<NullDistribution> {
    NullModelEngine::new(attributes, neighborhoods, rule)
        .permutations(permutations)
        .seed(seed)
        .generate(None)
}

// ============================================================================
// NullDistribution
// ============================================================================

/// Every permuted score, grouped per (node, attribute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullDistribution {
    rows: usize,
    cols: usize,
    permutations: usize,
    /// `samples[(node * cols + attribute) * permutations + k]`
    samples: Vec<Option<f64>>,
    /// Per attribute: the input column was degenerate.
    degenerate: Vec<bool>,
}

impl NullDistribution {
    pub fn permutations(&self) -> usize {
        self.permutations
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Null samples of one pair, in permutation order.
    pub fn samples(&self, node: usize, attribute: usize) -> &[Option<f64>] {
        let start = (node * self.cols + attribute) * self.permutations;
        &self.samples[start..start + self.permutations]
    }

    /// Exceedance counts of the samples against `observed`.
    pub fn tally(&self, observed: &Scores) -> Result<NullTally> {
        if observed.shape() != self.shape() {
            return Err(Error::Alignment(format!(
                "Observed scores have shape {:?}, null has {:?}", observed.shape(), self.shape()
            )));
        }
        let pairs = self.rows * self.cols;
        let mut tally = NullTally::new(pairs);
        let mut column = vec![None; pairs];
        for k in 0..self.permutations {
            for (pair, slot) in column.iter_mut().enumerate() {
                *slot = self.samples[pair * self.permutations + k];
            }
            tally.record(observed.as_slice(), &column);
        }
        tally.permutations = self.permutations;
        tally.degenerate = self.degenerate.clone();
        Ok(tally)
    }
}

// ============================================================================
// NullTally
// ============================================================================

/// Per-pair summary of the null relative to the observed score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullTally {
    pub permutations: usize,
    /// samples ≥ observed
    pub at_least: Vec<u32>,
    /// samples ≤ observed
    pub at_most: Vec<u32>,
    /// samples that were computable
    pub valid: Vec<u32>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    /// Per attribute: the input column was all missing or constant.
    #[serde(default)]
    pub degenerate: Vec<bool>,
}

impl NullTally {
    fn new(pairs: usize) -> Self {
        Self {
            permutations: 0,
            at_least: vec![0; pairs],
            at_most: vec![0; pairs],
            valid: vec![0; pairs],
            min: vec![f64::INFINITY; pairs],
            max: vec![f64::NEG_INFINITY; pairs],
            degenerate: Vec::new(),
        }
    }

    fn record(&mut self, observed: &[Option<f64>], sample: &[Option<f64>]) {
        for (pair, (obs, null)) in observed.iter().zip(sample).enumerate() {
            let Some(s) = *null else { continue };
            self.valid[pair] += 1;
            self.min[pair] = self.min[pair].min(s);
            self.max[pair] = self.max[pair].max(s);
            if let Some(o) = *obs {
                let tol = TIE_TOLERANCE * o.abs().max(1.0);
                if s >= o - tol {
                    self.at_least[pair] += 1;
                }
                if s <= o + tol {
                    self.at_most[pair] += 1;
                }
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        if self.valid.is_empty() {
            return other;
        }
        for pair in 0..self.valid.len() {
            self.at_least[pair] += other.at_least[pair];
            self.at_most[pair] += other.at_most[pair];
            self.valid[pair] += other.valid[pair];
            self.min[pair] = self.min[pair].min(other.min[pair]);
            self.max[pair] = self.max[pair].max(other.max[pair]);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    /// True when the null was drawn from a degenerate column. Such a
    /// column can still yield a varying null when its missing values
    /// land on different nodes.
    pub fn is_degenerate_column(&self, attribute: usize) -> bool {
        self.degenerate.get(attribute).copied().unwrap_or(false)
    }

    /// True when every valid sample of `pair` has the same value.
    pub fn is_point_mass(&self, pair: usize) -> bool {
        let (lo, hi) = (self.min[pair], self.max[pair]);
        self.valid[pair] > 0 && hi - lo <= TIE_TOLERANCE * lo.abs().max(hi.abs()).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::model::NodeId;

    fn inputs() -> (AttributeMatrix, Neighborhoods) {
        let rows = vec![
            vec![Some(1.0), Some(0.5)],
            vec![Some(0.0), None],
            vec![Some(1.0), Some(2.0)],
            vec![Some(0.0), Some(-1.0)],
            vec![Some(0.0), Some(3.0)],
        ];
        let attrs = AttributeMatrix::from_rows(
            (0..5).map(NodeId).collect(),
            vec!["bin".into(), "quant".into()],
            rows,
        ).unwrap();
        let hoods = Neighborhoods::from_members(vec![
            vec![0, 1], vec![0, 1, 2], vec![1, 2, 3], vec![2, 3, 4], vec![3, 4],
        ]);
        (attrs, hoods)
    }

    #[test]
    fn permutations_are_valid_and_seeded() {
        let (attrs, hoods) = inputs();
        let engine = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum).seed(7);
        let mut p = engine.permutation(3);
        assert_eq!(p, engine.permutation(3));
        p.sort_unstable();
        assert_eq!(p, vec![0, 1, 2, 3, 4]);
        let other = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum).seed(8);
        assert!((0..20).any(|k| engine.permutation(k) != other.permutation(k)));
    }

    #[test]
    fn generate_is_bit_reproducible_across_batch_sizes() {
        let (attrs, hoods) = inputs();
        let a = NullModelEngine::new(&attrs, &hoods, AggregationRule::Mean)
            .permutations(50).seed(11).batch_size(7)
            .generate(None).unwrap();
        let b = NullModelEngine::new(&attrs, &hoods, AggregationRule::Mean)
            .permutations(50).seed(11).batch_size(64)
            .generate(None).unwrap();
        let bits = |d: &NullDistribution| -> Vec<Option<u64>> {
            d.samples.iter().map(|s| s.map(f64::to_bits)).collect()
        };
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn streamed_tally_matches_materialised_null() {
        let (attrs, hoods) = inputs();
        let observed = aggregate(&attrs, &hoods, AggregationRule::Sum).unwrap();
        let engine = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum)
            .permutations(40).seed(3).batch_size(6);
        let streamed = engine.tally(&observed, None).unwrap();
        let stored = engine.generate(None).unwrap().tally(&observed).unwrap();
        assert_eq!(streamed, stored);
        assert_eq!(streamed.permutations, 40);
    }

    #[test]
    fn full_neighborhood_null_is_point_mass() {
        let (attrs, _) = inputs();
        let hoods = Neighborhoods::from_members(vec![(0..5).collect(); 5]);
        let observed = aggregate(&attrs, &hoods, AggregationRule::Sum).unwrap();
        let tally = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum)
            .permutations(10)
            .tally(&observed, None)
            .unwrap();
        assert!((0..tally.len()).all(|pair| tally.is_point_mass(pair)));
    }

    #[test]
    fn constant_column_with_gaps_is_flagged_degenerate() {
        let attrs = AttributeMatrix::from_rows(
            (0..6).map(NodeId).collect(),
            vec!["flat".into(), "varied".into()],
            (0..6).map(|v| vec![(v % 2 == 0).then_some(1.0), Some(v as f64)]).collect(),
        ).unwrap();
        let hoods = Neighborhoods::from_members(
            (0..6).map(|v| vec![v, (v + 1) % 6, (v + 2) % 6]).collect(),
        );
        let observed = aggregate(&attrs, &hoods, AggregationRule::Sum).unwrap();
        let engine = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum).permutations(20);

        let streamed = engine.tally(&observed, None).unwrap();
        assert_eq!(streamed.degenerate, vec![true, false]);
        assert!(streamed.is_degenerate_column(0));
        assert!(!streamed.is_degenerate_column(1));
        // gaps move with the rows, so the null is not a point mass
        assert!((0..6).any(|v| !streamed.is_point_mass(v * 2)));

        let stored = engine.generate(None).unwrap().tally(&observed).unwrap();
        assert_eq!(stored, streamed);
    }

    #[test]
    fn cancellation_stops_between_batches() {
        let (attrs, hoods) = inputs();
        let token = CancellationToken::new();
        token.cancel();
        let err = NullModelEngine::new(&attrs, &hoods, AggregationRule::Sum)
            .permutations(10)
            .generate(Some(&token));
        assert!(matches!(err, Err(Error::Cancelled { completed: 0, requested: 10 })));
    }

    #[test]
    fn rejects_zero_permutations() {
        let (attrs, hoods) = inputs();
        let err = generate_null(&attrs, &hoods, AggregationRule::Sum, 0, 1);
        assert!(matches!(err, Err(Error::Configuration(_))));
    }
}
