//! # Significance
//!
//! Observed scores + null → per-pair p-values → multiple-testing
//! correction → a call per (node, attribute).
//!
//! Every pair ends in exactly one of four calls. `NotTestable` is kept
//! apart from `NotSignificant` all the way to the output, so a degenerate
//! attribute never reads as a negative result.

pub mod pvalue;
pub mod correction;
pub mod hypergeom;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::Scores;
use crate::model::Matrix;
use crate::null_model::{NullDistribution, NullTally};
use crate::{Error, Result};

pub use pvalue::NegLog10;
pub use correction::{Correction, CorrectionScope, correct};
pub use hypergeom::{TailPValues, hypergeometric_p_values};

/// Tail(s) in which extremity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    /// High scores (enrichment).
    #[default]
    Right,
    /// Low scores (depletion).
    Left,
    Both,
}

impl Tail {
    pub fn right(self) -> bool {
        matches!(self, Tail::Right | Tail::Both)
    }

    pub fn left(self) -> bool {
        matches!(self, Tail::Left | Tail::Both)
    }
}

/// Outcome for one (node, attribute) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    Enriched,
    Depleted,
    NotSignificant,
    NotTestable,
}

impl Call {
    pub fn is_testable(self) -> bool {
        self != Call::NotTestable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Call::Enriched => "enriched",
            Call::Depleted => "depleted",
            Call::NotSignificant => "not_significant",
            Call::NotTestable => "not_testable",
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Test settings shared by every pair of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceEvaluator {
    pub tail: Tail,
    pub correction: Correction,
    pub scope: CorrectionScope,
    pub alpha: f64,
}

impl Default for SignificanceEvaluator {
    fn default() -> Self {
        Self {
            tail: Tail::Right,
            correction: Correction::BenjaminiHochberg,
            scope: CorrectionScope::PerAttribute,
            alpha: 0.05,
        }
    }
}

impl SignificanceEvaluator {
    pub fn new(tail: Tail, correction: Correction, alpha: f64) -> Self {
        Self { tail, correction, alpha, ..Self::default() }
    }

    pub fn with_scope(mut self, scope: CorrectionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::Configuration(format!(
                "Significance threshold alpha must lie in (0, 1], got {}", self.alpha
            )));
        }
        Ok(())
    }

    /// Evaluate against a materialised null.
    pub fn evaluate(&self, observed: &Scores, null: &NullDistribution) -> Result<Significance> {
        let tally = null.tally(observed)?;
        self.evaluate_tally(observed, &tally, &[])
    }

    /// Evaluate from streamed exceedance counts. Columns flagged in
    /// `untestable_columns`, or built from a degenerate column, are
    /// `NotTestable` throughout.
    pub fn evaluate_tally(
        &self,
        observed: &Scores,
        tally: &NullTally,
        untestable_columns: &[bool],
    ) -> Result<Significance> {
        self.validate()?;
        let (rows, cols) = observed.shape();
        if tally.len() != rows * cols {
            return Err(Error::Alignment(format!(
                "Null tally covers {} pairs, observed scores {}", tally.len(), rows * cols
            )));
        }

        let tail = self.tail;
        let pairs: Vec<(Option<NegLog10>, Option<NegLog10>)> = (0..rows * cols)
            .into_par_iter()
            .map(|pair| {
                let col = pair % cols;
                let testable = observed.as_slice()[pair].is_some()
                    && !untestable_columns.get(col).copied().unwrap_or(false)
                    && !tally.is_degenerate_column(col)
                    && tally.valid[pair] > 0
                    && !tally.is_point_mass(pair);
                if !testable {
                    return (None, None);
                }
                let valid = tally.valid[pair];
                (
                    tail.right().then(|| NegLog10::from_counts(tally.at_least[pair], valid)),
                    tail.left().then(|| NegLog10::from_counts(tally.at_most[pair], valid)),
                )
            })
            .collect();

        let (right, left): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let to_matrix = |v| Matrix::from_vec(rows, cols, v)
            .ok_or_else(|| Error::Alignment("p-value matrix shape".into()));
        self.evaluate_p_values(to_matrix(right)?, to_matrix(left)?)
    }

    /// Correct raw p-values and assign calls. A pair is testable when the
    /// requested tail(s) carry a p-value.
    pub fn evaluate_p_values(
        &self,
        raw_right: Matrix<Option<NegLog10>>,
        raw_left: Matrix<Option<NegLog10>>,
    ) -> Result<Significance> {
        self.validate()?;
        if raw_right.shape() != raw_left.shape() {
            return Err(Error::Alignment(format!(
                "Right-tail p-values {:?} vs left-tail {:?}", raw_right.shape(), raw_left.shape()
            )));
        }
        let (rows, cols) = raw_right.shape();

        let corrected_right = self.correct_matrix(&raw_right);
        let corrected_left = self.correct_matrix(&raw_left);

        let mut calls = Matrix::filled(rows, cols, Call::NotTestable);
        for pair in 0..rows * cols {
            let r = self.tail.right().then(|| corrected_right.as_slice()[pair]).flatten();
            let l = self.tail.left().then(|| corrected_left.as_slice()[pair]).flatten();
            let testable = (!self.tail.right() || r.is_some()) && (!self.tail.left() || l.is_some());
            if !testable {
                continue;
            }
            let up = r.filter(|x| x.is_significant(self.alpha));
            let down = l.filter(|x| x.is_significant(self.alpha));
            calls.as_mut_slice()[pair] = match (up, down) {
                (Some(u), Some(d)) if d > u => Call::Depleted,
                (Some(_), _) => Call::Enriched,
                (None, Some(_)) => Call::Depleted,
                (None, None) => Call::NotSignificant,
            };
        }

        Ok(Significance {
            raw_right,
            raw_left,
            corrected_right,
            corrected_left,
            calls,
            tail: self.tail,
            correction: self.correction,
            scope: self.scope,
            alpha: self.alpha,
        })
    }

    fn correct_matrix(&self, raw: &Matrix<Option<NegLog10>>) -> Matrix<Option<NegLog10>> {
        let mut out = raw.clone();
        let (rows, cols) = raw.shape();
        let families: Vec<Vec<usize>> = match self.scope {
            CorrectionScope::PerAttribute => (0..cols)
                .map(|c| (0..rows).map(|r| r * cols + c).collect())
                .collect(),
            CorrectionScope::Global => vec![(0..rows * cols).collect()],
        };
        for family in families {
            let members: Vec<usize> = family.into_iter()
                .filter(|&i| raw.as_slice()[i].is_some())
                .collect();
            let mut values: Vec<NegLog10> = members.iter()
                .filter_map(|&i| raw.as_slice()[i])
                .collect();
            correct(&mut values, self.correction);
            for (i, v) in members.into_iter().zip(values) {
                out.as_mut_slice()[i] = Some(v);
            }
        }
        out
    }
}

// ============================================================================
// Significance
// ============================================================================

/// p-values and calls for every (node, attribute) pair of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Significance {
    pub raw_right: Matrix<Option<NegLog10>>,
    pub raw_left: Matrix<Option<NegLog10>>,
    pub corrected_right: Matrix<Option<NegLog10>>,
    pub corrected_left: Matrix<Option<NegLog10>>,
    pub calls: Matrix<Call>,
    pub tail: Tail,
    pub correction: Correction,
    pub scope: CorrectionScope,
    pub alpha: f64,
}

impl Significance {
    pub fn shape(&self) -> (usize, usize) {
        self.calls.shape()
    }

    pub fn call(&self, node: usize, attribute: usize) -> Call {
        *self.calls.get(node, attribute)
    }

    pub fn is_enriched(&self, node: usize, attribute: usize) -> bool {
        self.call(node, attribute) == Call::Enriched
    }

    /// Attributes for which `node` is enriched, ascending.
    pub fn enriched_attributes(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.calls.row(node)
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Enriched)
            .map(|(a, _)| a)
    }

    /// Signed neighborhood enrichment score: `-log10` of the corrected
    /// right-tail p minus that of the left tail. Positive for enrichment,
    /// negative for depletion, `None` when not testable.
    pub fn signed_score(&self, node: usize, attribute: usize) -> Option<f64> {
        if !self.call(node, attribute).is_testable() {
            return None;
        }
        let r = self.corrected_right.get(node, attribute).map_or(0.0, NegLog10::value);
        let l = self.corrected_left.get(node, attribute).map_or(0.0, NegLog10::value);
        Some(r - l)
    }

    pub fn signed_scores(&self) -> Matrix<Option<f64>> {
        let (rows, cols) = self.shape();
        let data = (0..rows * cols).map(|i| self.signed_score(i / cols, i % cols)).collect();
        Matrix::from_vec(rows, cols, data).unwrap_or_else(|| Matrix::filled(rows, cols, None))
    }

    /// Number of enriched nodes per attribute.
    pub fn enriched_counts(&self) -> Vec<usize> {
        let (_, cols) = self.shape();
        (0..cols)
            .map(|c| self.calls.column(c).filter(|x| **x == Call::Enriched).count())
            .collect()
    }
}
