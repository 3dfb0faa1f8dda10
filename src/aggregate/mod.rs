//! # Neighborhood aggregation
//!
//! Turns the attribute matrix into one score per (node, attribute): the
//! chosen rule applied to the attribute values found in the node's
//! neighborhood. Missing values are skipped; a neighborhood with no value
//! at all scores `None`, which downstream stages read as "not testable".
//!
//! The same kernel runs for the observed data and for every null-model
//! permutation. A permutation is passed as a row map (`node → source row`)
//! so attribute values move while neighborhoods stay fixed.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::{AttributeMatrix, Matrix};
use crate::neighborhood::{Neighborhood, Neighborhoods};
use crate::{Error, Result};

/// Observed or permuted score per (node, attribute).
pub type Scores = Matrix<Option<f64>>;

/// Aggregation rule applied to every node and attribute of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRule {
    #[default]
    Sum,
    Mean,
    /// Mean weighted by the neighborhood member weights.
    WeightedMean,
    Max,
    /// Linear-interpolated quantile, `q` in `[0, 1]`.
    Quantile(f64),
    /// Neighborhood sum over the root of the within-neighborhood sum of
    /// squared deviations. `None` when the deviation is zero.
    Normalized,
}

impl AggregationRule {
    /// Check the rule against the neighborhoods it will run on.
    pub fn validate(&self, neighborhoods: &Neighborhoods) -> Result<()> {
        match *self {
            AggregationRule::WeightedMean if !neighborhoods.has_weights() => Err(Error::Configuration(
                "Weighted-mean aggregation requires weighted neighborhoods".into(),
            )),
            AggregationRule::Quantile(q) if !(0.0..=1.0).contains(&q) => Err(Error::Configuration(
                format!("Quantile must lie in [0, 1], got {q}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Score every node and attribute over the observed data.
pub fn aggregate(
    attributes: &AttributeMatrix,
    neighborhoods: &Neighborhoods,
    rule: AggregationRule,
) -> Result<Scores> {
    rule.validate(neighborhoods)?;
    if neighborhoods.len() != attributes.node_count() {
        return Err(Error::Alignment(format!(
            "{} neighborhoods for {} attribute rows",
            neighborhoods.len(), attributes.node_count()
        )));
    }

    let cols = attributes.attribute_count();
    let mut out = Matrix::filled(neighborhoods.len(), cols, None);
    if cols == 0 {
        return Ok(out);
    }
    out.as_mut_slice()
        .par_chunks_mut(cols)
        .enumerate()
        .for_each_init(
            || Accumulator::new(cols),
            |acc, (node, row)| acc.score(attributes.values(), neighborhoods.get(node), rule, None, row),
        );
    Ok(out)
}

/// Score one permutation sequentially into `out`. `row_of[v]` is the
/// attribute row whose values node `v` carries in this permutation.
pub(crate) fn aggregate_into(
    values: &Matrix<Option<f64>>,
    neighborhoods: &Neighborhoods,
    rule: AggregationRule,
    row_of: &[usize],
    acc: &mut Accumulator,
    out: &mut Scores,
) {
    for node in 0..neighborhoods.len() {
        acc.score(values, neighborhoods.get(node), rule, Some(row_of), out.row_mut(node));
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// Reusable per-thread scratch space, one slot per attribute.
pub(crate) struct Accumulator {
    count: Vec<u32>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    weighted: Vec<f64>,
    weight_total: Vec<f64>,
    max: Vec<f64>,
    buffer: Vec<f64>,
}

impl Accumulator {
    pub(crate) fn new(cols: usize) -> Self {
        Self {
            count: vec![0; cols],
            sum: vec![0.0; cols],
            sum_sq: vec![0.0; cols],
            weighted: vec![0.0; cols],
            weight_total: vec![0.0; cols],
            max: vec![f64::NEG_INFINITY; cols],
            buffer: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.count.fill(0);
        self.sum.fill(0.0);
        self.sum_sq.fill(0.0);
        self.weighted.fill(0.0);
        self.weight_total.fill(0.0);
        self.max.fill(f64::NEG_INFINITY);
    }

    fn score(
        &mut self,
        values: &Matrix<Option<f64>>,
        hood: Neighborhood<'_>,
        rule: AggregationRule,
        row_of: Option<&[usize]>,
        out: &mut [Option<f64>],
    ) {
        let source = |member: usize| row_of.map_or(member, |map| map[member]);

        self.reset();
        for (i, &member) in hood.members.iter().enumerate() {
            let weight = hood.weights.map_or(1.0, |w| w[i]);
            for (col, value) in values.row(source(member)).iter().enumerate() {
                let Some(x) = *value else { continue };
                self.count[col] += 1;
                self.sum[col] += x;
                self.sum_sq[col] += x * x;
                self.weighted[col] += weight * x;
                self.weight_total[col] += weight;
                if x > self.max[col] {
                    self.max[col] = x;
                }
            }
        }

        for (col, slot) in out.iter_mut().enumerate() {
            let n = self.count[col];
            *slot = if n == 0 {
                None
            } else {
                match rule {
                    AggregationRule::Sum => Some(self.sum[col]),
                    AggregationRule::Mean => Some(self.sum[col] / n as f64),
                    AggregationRule::WeightedMean => (self.weight_total[col] > 0.0)
                        .then(|| self.weighted[col] / self.weight_total[col]),
                    AggregationRule::Max => Some(self.max[col]),
                    AggregationRule::Normalized => {
                        normalized(self.sum[col], self.sum_sq[col], n)
                    }
                    AggregationRule::Quantile(q) => {
                        self.buffer.clear();
                        self.buffer.extend(
                            hood.members.iter().filter_map(|&m| *values.get(source(m), col)),
                        );
                        quantile(&mut self.buffer, q)
                    }
                }
            };
        }
    }
}

fn normalized(sum: f64, sum_sq: f64, n: u32) -> Option<f64> {
    let deviation = sum_sq - sum * sum / n as f64;
    if deviation <= 1e-12 * sum_sq.max(1.0) {
        None
    } else {
        Some(sum / deviation.sqrt())
    }
}

/// Quantile with linear interpolation between order statistics.
fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let pos = q * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}
