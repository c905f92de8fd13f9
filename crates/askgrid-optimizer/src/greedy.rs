//! Greedy knapsack fill ordered by regression weight.
//!
//! The full known order set trains the classifier so the fitted price
//! surface sees the whole market, while only the matched candidates are
//! actually packed.

use std::collections::HashSet;

use tracing::debug;

use askgrid_core::{MarketOrder, OrderId};
use askgrid_regression::{ModelConfig, RegressionClassifier, SigmoidConfig, sort_orders};

use crate::error::{OptimizeError, OptimizeResult};
use crate::knapsack::Knapsack;
use crate::{MIN_TRAINING_ORDERS, OptimizationMethod};

pub struct GreedyRegressionModel {
    classifier: RegressionClassifier,
    known_orders: Vec<MarketOrder>,
    /// Orders whose |weight| falls below this are ignored; weights that
    /// close to zero usually mean a zero or junk price.
    weight_epsilon: f64,
    /// Stop after this many misfit orders in a row to bound runtime on
    /// long tails of unfittable orders.
    exhaustion_limit: usize,
}

impl GreedyRegressionModel {
    pub fn new(
        model: &ModelConfig,
        sigmoid: SigmoidConfig,
        weight_epsilon: f64,
        exhaustion_limit: usize,
        known_orders: Vec<MarketOrder>,
    ) -> Self {
        Self {
            classifier: RegressionClassifier::new(model, sigmoid),
            known_orders,
            weight_epsilon,
            exhaustion_limit,
        }
    }
}

impl OptimizationMethod for GreedyRegressionModel {
    fn optimize(&self, knapsack: &mut Knapsack, orders: &[MarketOrder]) -> OptimizeResult<()> {
        if self.known_orders.len() <= MIN_TRAINING_ORDERS {
            return Err(OptimizeError::NotEnoughOrders {
                actual: self.known_orders.len(),
                required: MIN_TRAINING_ORDERS + 1,
            });
        }

        let mut classification = self.classifier.classify(&self.known_orders)?;
        sort_orders(&mut classification.weighted_orders);

        let candidates: HashSet<OrderId> = orders.iter().map(|order| order.id).collect();

        let mut exhausted = 0usize;
        for weighted in &classification.weighted_orders {
            if weighted.weight.abs() < self.weight_epsilon {
                debug!(order = %weighted.order.id, weight = weighted.weight, "ignoring order, weight too low");
                continue;
            }
            if !candidates.contains(&weighted.order.id) {
                continue;
            }
            if exhausted >= self.exhaustion_limit {
                break;
            }

            debug!(
                order = %weighted.order.id,
                weight = weighted.weight,
                price = %weighted.order.price,
                predicted_price = %weighted.predicted_price,
                "trying to put an order into the resources pool"
            );

            if knapsack.put(&weighted.order).is_err() {
                exhausted += 1;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{knapsack, order};

    fn market() -> Vec<MarketOrder> {
        // Price grows with required capacity so the regression has a
        // clean trend to fit.
        (0..16)
            .map(|i| {
                order(
                    i,
                    100 * (i as u128 + 1),
                    &[1000 * (i + 1), 10_000_000 * (i + 1)],
                )
            })
            .collect()
    }

    #[test]
    fn fills_the_knapsack_from_matched_orders() {
        let orders = market();
        let model = GreedyRegressionModel::new(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            0.01,
            128,
            orders.clone(),
        );

        let mut sack = knapsack();
        model.optimize(&mut sack, &orders).unwrap();

        assert!(!sack.plans().is_empty());
        assert!(sack.price().0 > 0);

        // Nothing packed may exceed the two-core budget.
        let total_percents: u64 = sack.plans().iter().map(|p| p.resources.cpu_core_percents).sum();
        assert!(total_percents <= 200);
    }

    #[test]
    fn refuses_thin_training_sets() {
        let orders: Vec<MarketOrder> = market().into_iter().take(5).collect();
        let model = GreedyRegressionModel::new(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            0.01,
            128,
            orders.clone(),
        );

        let mut sack = knapsack();
        assert_eq!(
            model.optimize(&mut sack, &orders),
            Err(OptimizeError::NotEnoughOrders {
                actual: 5,
                required: 13,
            })
        );
    }

    #[test]
    fn unmatched_orders_are_never_packed() {
        let orders = market();
        let model = GreedyRegressionModel::new(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            0.01,
            128,
            orders.clone(),
        );

        // Only order 3 is a candidate.
        let mut sack = knapsack();
        model.optimize(&mut sack, &orders[3..4]).unwrap();

        for plan in sack.plans() {
            assert_eq!(plan.order_id, Some(OrderId(3)));
        }
    }
}
