//! Run configuration.
//!
//! One flat, serde-friendly bundle of every recognised option. Missing
//! fields take their defaults, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationRule;
use crate::domain::{AttributeFilter, DomainConsolidator, Proximity};
use crate::neighborhood::{DistanceMetric, NeighborhoodBuilder, RadiusScale, Weighting};
use crate::null_model::DEFAULT_BATCH_SIZE;
use crate::significance::{Correction, CorrectionScope, SignificanceEvaluator, Tail};
use crate::{Error, Result};

/// How p-values are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentTest {
    /// Empirical null from attribute permutations.
    #[default]
    Permutation,
    /// Analytic hypergeometric tail; binary attributes only.
    Hypergeometric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeConfig {
    // --- Neighborhoods ---
    pub radius: f64,
    pub radius_scale: RadiusScale,
    pub metric: DistanceMetric,
    pub include_self: bool,
    pub weighting: Weighting,

    // --- Scoring ---
    pub aggregation_rule: AggregationRule,
    pub test: EnrichmentTest,
    pub permutations: usize,
    pub seed: u64,
    pub batch_size: usize,

    // --- Significance ---
    pub tail: Tail,
    pub correction: Correction,
    pub correction_scope: CorrectionScope,
    pub alpha: f64,

    // --- Domains ---
    pub overlap_threshold: f64,
    pub attribute_similarity_threshold: f64,
    pub domain_proximity: Proximity,
    pub min_enriched_nodes: usize,
    pub require_single_component: bool,
    pub min_domain_size: usize,
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            radius_scale: RadiusScale::Absolute,
            metric: DistanceMetric::HopDistance,
            include_self: true,
            weighting: Weighting::InverseDistance,
            aggregation_rule: AggregationRule::Sum,
            test: EnrichmentTest::Permutation,
            permutations: 1000,
            seed: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            tail: Tail::Right,
            correction: Correction::BenjaminiHochberg,
            correction_scope: CorrectionScope::PerAttribute,
            alpha: 0.05,
            overlap_threshold: 0.5,
            attribute_similarity_threshold: 0.0,
            domain_proximity: Proximity::Adjacent,
            min_enriched_nodes: 1,
            require_single_component: false,
            min_domain_size: 1,
        }
    }
}

impl SafeConfig {
    /// Parse a JSON configuration and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject every invalid option before any computation starts.
    pub fn validate(&self) -> Result<()> {
        self.neighborhoods().validate()?;
        if self.test == EnrichmentTest::Permutation {
            if self.permutations == 0 {
                return Err(Error::Configuration("At least one permutation is required".into()));
            }
            if self.batch_size == 0 {
                return Err(Error::Configuration("Permutation batch size must be positive".into()));
            }
        }
        if let AggregationRule::Quantile(q) = self.aggregation_rule {
            if !(0.0..=1.0).contains(&q) {
                return Err(Error::Configuration(format!("Quantile must lie in [0, 1], got {q}")));
            }
        }
        if self.aggregation_rule == AggregationRule::WeightedMean && self.weighting == Weighting::Uniform {
            return Err(Error::Configuration(
                "Weighted-mean aggregation requires inverse-distance weighting".into(),
            ));
        }
        if self.test == EnrichmentTest::Hypergeometric && self.aggregation_rule != AggregationRule::Sum {
            return Err(Error::Configuration(
                "The hypergeometric test scores neighborhood sums; use the sum rule".into(),
            ));
        }
        self.significance().validate()?;
        self.consolidator().validate()
    }

    pub fn neighborhoods(&self) -> NeighborhoodBuilder {
        NeighborhoodBuilder::new(self.radius, self.metric)
            .with_scale(self.radius_scale)
            .include_self(self.include_self)
            .with_weighting(self.weighting)
    }

    pub fn significance(&self) -> SignificanceEvaluator {
        SignificanceEvaluator::new(self.tail, self.correction, self.alpha)
            .with_scope(self.correction_scope)
    }

    pub fn attribute_filter(&self) -> AttributeFilter {
        AttributeFilter {
            min_enriched_nodes: self.min_enriched_nodes,
            require_single_component: self.require_single_component,
        }
    }

    pub fn consolidator(&self) -> DomainConsolidator {
        DomainConsolidator::new(self.overlap_threshold)
            .attribute_similarity(self.attribute_similarity_threshold)
            .min_domain_size(self.min_domain_size)
            .proximity(self.domain_proximity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_json_is_default() {
        assert_eq!(SafeConfig::from_json_str("{}").unwrap(), SafeConfig::default());
    }

    #[test]
    fn parses_partial_json() {
        let config = SafeConfig::from_json_str(
            r#"{"radius": 2, "tail": "both", "correction": "bonferroni",
                "aggregation_rule": {"quantile": 0.9}, "correction_scope": "global"}"#,
        ).unwrap();
        assert_eq!(config.radius, 2.0);
        assert_eq!(config.tail, Tail::Both);
        assert_eq!(config.correction, Correction::Bonferroni);
        assert_eq!(config.aggregation_rule, AggregationRule::Quantile(0.9));
        assert_eq!(config.correction_scope, CorrectionScope::Global);
        assert_eq!(config.permutations, 1000);
    }

    #[test]
    fn json_round_trip() {
        let config = SafeConfig { seed: 42, alpha: 0.01, ..SafeConfig::default() };
        let back = SafeConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_invalid_options() {
        let bad = [
            SafeConfig { radius: 0.0, ..SafeConfig::default() },
            SafeConfig { radius: f64::NAN, ..SafeConfig::default() },
            SafeConfig { permutations: 0, ..SafeConfig::default() },
            SafeConfig { alpha: 0.0, ..SafeConfig::default() },
            SafeConfig { overlap_threshold: 1.2, ..SafeConfig::default() },
            SafeConfig { aggregation_rule: AggregationRule::Quantile(2.0), ..SafeConfig::default() },
            SafeConfig { radius_scale: RadiusScale::LayoutFraction, ..SafeConfig::default() },
            SafeConfig {
                aggregation_rule: AggregationRule::WeightedMean,
                weighting: Weighting::Uniform,
                ..SafeConfig::default()
            },
            SafeConfig {
                test: EnrichmentTest::Hypergeometric,
                aggregation_rule: AggregationRule::Mean,
                ..SafeConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Configuration(_))), "{config:?}");
        }
    }

    #[test]
    fn rejects_unknown_enum_values() {
        let err = SafeConfig::from_json_str(r#"{"metric": "manhattan"}"#);
        assert!(matches!(err, Err(Error::Serialization(_))));
    }
}
