//! Analytic enrichment for binary attributes.
//!
//! For 0/1 attributes the permutation null of a neighborhood sum is the
//! hypergeometric distribution: drawing the neighborhood's annotated
//! members from the population of annotated nodes without replacement.

use statrs::distribution::{DiscreteCDF, Hypergeometric};
use tracing::warn;

use super::{NegLog10, Tail};
use crate::model::{AttributeMatrix, Matrix};
use crate::neighborhood::Neighborhoods;
use crate::{Error, Result};

/// Raw right- and left-tail p-values per (node, attribute).
pub type TailPValues = (Matrix<Option<NegLog10>>, Matrix<Option<NegLog10>>);

/// Hypergeometric p-values for every testable pair.
///
/// Population is the set of nodes with a value for the attribute;
/// successes are those with value 1. Columns flagged in `skip` and
/// neighborhoods with no valued member stay `None`.
pub fn hypergeometric_p_values(
    attributes: &AttributeMatrix,
    neighborhoods: &Neighborhoods,
    tail: Tail,
    skip: &[bool],
) -> Result<TailPValues> {
    let (rows, cols) = (attributes.node_count(), attributes.attribute_count());
    let mut right = Matrix::filled(rows, cols, None);
    let mut left = Matrix::filled(rows, cols, None);

    for col in 0..cols {
        if skip.get(col).copied().unwrap_or(false) {
            continue;
        }
        if !attributes.is_binary(col) {
            return Err(Error::Configuration(format!(
                "Hypergeometric test needs 0/1 values, attribute '{}' is quantitative",
                attributes.attributes()[col].name
            )));
        }

        let population = attributes.values().column(col).filter(|v| v.is_some()).count() as u64;
        let successes = attributes.values().column(col).filter(|v| **v == Some(1.0)).count() as u64;
        let mut underflows = 0usize;

        for node in 0..rows {
            let hood = neighborhoods.get(node);
            let (mut draws, mut hits) = (0u64, 0u64);
            for &member in hood.members {
                if let Some(v) = attributes.value(member, col) {
                    draws += 1;
                    if v == 1.0 {
                        hits += 1;
                    }
                }
            }
            if draws == 0 {
                continue;
            }

            let dist = Hypergeometric::new(population, successes, draws)
                .map_err(|e| Error::InvalidInput(format!("Hypergeometric parameters: {e}")))?;

            let mut to_neglog = |p: f64| {
                if p <= 0.0 {
                    underflows += 1;
                    NegLog10::from_p(f64::MIN_POSITIVE)
                } else {
                    NegLog10::from_p(p.min(1.0))
                }
            };

            if matches!(tail, Tail::Right | Tail::Both) {
                // P(X >= hits); sf(k) is P(X > k)
                let p = if hits == 0 { 1.0 } else { dist.sf(hits - 1) };
                right.set(node, col, Some(to_neglog(p)?));
            }
            if matches!(tail, Tail::Left | Tail::Both) {
                left.set(node, col, Some(to_neglog(dist.cdf(hits))?));
            }
        }

        if underflows > 0 {
            warn!(
                attribute = %attributes.attributes()[col].name,
                underflows,
                "Hypergeometric p-values underflowed and were clamped to the smallest positive f64",
            );
        }
    }

    Ok((right, left))
}
