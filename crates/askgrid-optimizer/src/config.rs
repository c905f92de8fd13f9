//! Strategy selection resolved at configuration load.
//!
//! Unknown `type` tags are rejected by deserialization, never at call
//! time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use askgrid_core::MarketOrder;
use askgrid_regression::{ModelConfig, SigmoidConfig};

use crate::OptimizationMethod;
use crate::batch::BatchModel;
use crate::branch_bound::{BranchBoundModel, DEFAULT_DEPTH_LIMIT};
use crate::genetic::{GeneticModel, GenomeKind};
use crate::greedy::GreedyRegressionModel;

/// Candidate counts below this get the exact solver; everything larger
/// gets the racing batch.
const SELECTION_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MethodConfig {
    Greedy {
        #[serde(default = "default_weight_epsilon")]
        weight_epsilon: f64,
        #[serde(default = "default_exhaustion_limit")]
        exhaustion_limit: usize,
        #[serde(default)]
        model: ModelConfig,
        #[serde(default)]
        sigmoid: SigmoidConfig,
    },
    BranchBound {
        #[serde(default = "default_depth_limit")]
        depth_limit: usize,
    },
    Genetic {
        genome: GenomeKind,
        #[serde(default = "default_population_size")]
        population_size: usize,
        #[serde(default = "default_max_generations")]
        max_generations: usize,
        #[serde(default = "default_max_age_secs")]
        max_age_secs: u64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Batch {
        methods: Vec<MethodConfig>,
        #[serde(default = "default_brute_threshold")]
        brute_threshold: usize,
        #[serde(default = "default_brute_method")]
        brute: Box<MethodConfig>,
    },
}

fn default_weight_epsilon() -> f64 {
    0.01
}

fn default_exhaustion_limit() -> usize {
    128
}

fn default_depth_limit() -> usize {
    DEFAULT_DEPTH_LIMIT
}

fn default_population_size() -> usize {
    256
}

fn default_max_generations() -> usize {
    128
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_brute_threshold() -> usize {
    8
}

fn default_brute_method() -> Box<MethodConfig> {
    Box::new(MethodConfig::BranchBound {
        depth_limit: DEFAULT_DEPTH_LIMIT,
    })
}

impl MethodConfig {
    /// Instantiates the strategy. `known_orders` is the complete pulled
    /// order set, which regression-backed strategies train on even when
    /// only a subset is packable.
    pub fn create(&self, known_orders: &[MarketOrder]) -> Box<dyn OptimizationMethod> {
        match self {
            MethodConfig::Greedy {
                weight_epsilon,
                exhaustion_limit,
                model,
                sigmoid,
            } => Box::new(GreedyRegressionModel::new(
                model,
                *sigmoid,
                *weight_epsilon,
                *exhaustion_limit,
                known_orders.to_vec(),
            )),
            MethodConfig::BranchBound { depth_limit } => Box::new(BranchBoundModel {
                depth_limit: *depth_limit,
            }),
            MethodConfig::Genetic {
                genome,
                population_size,
                max_generations,
                max_age_secs,
                seed,
            } => Box::new(GeneticModel {
                genome: *genome,
                population_size: *population_size,
                max_generations: *max_generations,
                max_age: Duration::from_secs(*max_age_secs),
                seed: *seed,
            }),
            MethodConfig::Batch {
                methods,
                brute_threshold,
                brute,
            } => Box::new(BatchModel::new(
                methods.iter().map(|m| m.create(known_orders)).collect(),
                Some((*brute_threshold, brute.create(known_orders))),
            )),
        }
    }

    /// The default strategy for a given candidate count: exact search for
    /// small pools, a greedy-vs-genetic race for everything else.
    pub fn default_for(candidates: usize) -> MethodConfig {
        if candidates < SELECTION_THRESHOLD {
            return MethodConfig::BranchBound {
                depth_limit: DEFAULT_DEPTH_LIMIT,
            };
        }

        MethodConfig::Batch {
            methods: vec![
                MethodConfig::Greedy {
                    weight_epsilon: default_weight_epsilon(),
                    exhaustion_limit: default_exhaustion_limit(),
                    model: ModelConfig::default(),
                    sigmoid: SigmoidConfig::default(),
                },
                MethodConfig::Genetic {
                    genome: GenomeKind::Packed,
                    population_size: default_population_size(),
                    max_generations: default_max_generations(),
                    max_age_secs: default_max_age_secs(),
                    seed: None,
                },
                MethodConfig::Genetic {
                    genome: GenomeKind::Decision,
                    population_size: default_population_size(),
                    max_generations: default_max_generations(),
                    max_age_secs: default_max_age_secs(),
                    seed: None,
                },
            ],
            brute_threshold: default_brute_threshold(),
            brute: default_brute_method(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_dispatch_parses_known_methods() {
        let greedy: MethodConfig = serde_json::from_str(r#"{"type": "greedy"}"#).unwrap();
        assert!(matches!(
            greedy,
            MethodConfig::Greedy {
                exhaustion_limit: 128,
                ..
            }
        ));

        let genetic: MethodConfig =
            serde_json::from_str(r#"{"type": "genetic", "genome": "decision"}"#).unwrap();
        assert!(matches!(
            genetic,
            MethodConfig::Genetic {
                genome: GenomeKind::Decision,
                population_size: 256,
                ..
            }
        ));
    }

    #[test]
    fn unknown_method_tags_are_rejected() {
        assert!(serde_json::from_str::<MethodConfig>(r#"{"type": "simplex"}"#).is_err());
    }

    #[test]
    fn nested_batch_configs_parse() {
        let raw = r#"{
            "type": "batch",
            "methods": [
                {"type": "greedy"},
                {"type": "genetic", "genome": "packed"}
            ],
            "brute_threshold": 4
        }"#;
        let batch: MethodConfig = serde_json::from_str(raw).unwrap();
        let MethodConfig::Batch {
            methods,
            brute_threshold,
            brute,
        } = batch
        else {
            panic!("expected a batch config");
        };
        assert_eq!(methods.len(), 2);
        assert_eq!(brute_threshold, 4);
        assert!(matches!(*brute, MethodConfig::BranchBound { depth_limit: 6 }));
    }

    #[test]
    fn default_selection_scales_with_the_pool() {
        assert!(matches!(
            MethodConfig::default_for(10),
            MethodConfig::BranchBound { .. }
        ));
        assert!(matches!(
            MethodConfig::default_for(500),
            MethodConfig::Batch { .. }
        ));
    }
}
