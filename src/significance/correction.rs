//! Multiple-testing correction in the `-log10` domain.

use serde::{Deserialize, Serialize};

use super::NegLog10;

/// Correction method applied to each family of tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    None,
    Bonferroni,
    /// Benjamini–Hochberg step-up FDR.
    #[default]
    BenjaminiHochberg,
}

/// Which tests form one correction family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionScope {
    /// One family per attribute, across its testable nodes.
    #[default]
    PerAttribute,
    /// A single family across every testable (node, attribute) pair.
    Global,
}

/// Correct one family in place. Corrected p-values are never below the raw
/// ones and never above 1.
pub fn correct(family: &mut [NegLog10], method: Correction) {
    let m = family.len();
    if m <= 1 {
        return;
    }
    match method {
        Correction::None => {}
        Correction::Bonferroni => {
            for x in family.iter_mut() {
                *x = x.scaled(m as f64);
            }
        }
        Correction::BenjaminiHochberg => benjamini_hochberg(family),
    }
}

fn benjamini_hochberg(family: &mut [NegLog10]) {
    let m = family.len();
    // ascending p == descending -log10(p); index breaks ties
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| family[b].cmp(&family[a]).then(a.cmp(&b)));

    // adjusted_i = min_{j >= i} p_j * m / j, walked from the largest rank
    let mut running = NegLog10::ONE;
    for (rank0, &idx) in order.iter().enumerate().rev() {
        let rank = rank0 + 1;
        let adjusted = family[idx].scaled(m as f64 / rank as f64);
        running = running.max(adjusted);
        family[idx] = running;
    }
}
