//! Order classification: fits a regression over currently open bids and
//! ranks them by how far each price sits above the fitted surface.
//!
//! The pipeline is: pad benchmark vectors to a common width, min-max
//! normalize per column (dropping degenerate columns), fit the configured
//! model against normalized prices, then weight each order by its price
//! residual damped by an age sigmoid so stale bids sink.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use askgrid_core::{MarketOrder, Price};

use crate::error::TrainingError;
use crate::model::{Model, ModelConfig, TrainedModel};
use crate::normalize::MinMaxNormalizer;

/// Age damping: `1 - 1/(1 + exp(-alpha*(age - delta)/delta))`.
///
/// With the defaults an order half a day old carries half its raw weight
/// and a day-old order is effectively discarded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SigmoidConfig {
    #[serde(default = "default_sigmoid_alpha")]
    pub alpha: f64,
    #[serde(default = "default_sigmoid_delta")]
    pub delta: f64,
}

fn default_sigmoid_alpha() -> f64 {
    10.0
}

fn default_sigmoid_delta() -> f64 {
    43200.0
}

impl Default for SigmoidConfig {
    fn default() -> Self {
        Self {
            alpha: default_sigmoid_alpha(),
            delta: default_sigmoid_delta(),
        }
    }
}

impl SigmoidConfig {
    pub fn decay(&self, age_secs: f64) -> f64 {
        1.0 - 1.0 / (1.0 + (-self.alpha * (age_secs - self.delta) / self.delta).exp())
    }
}

/// A market order annotated with its regression verdict.
#[derive(Debug, Clone)]
pub struct WeightedOrder {
    pub order: MarketOrder,
    /// What the fitted surface thinks this hardware profile is worth.
    pub predicted_price: Price,
    /// Predicted minus actual price, in atto-USD/s.
    pub distance: f64,
    /// Final rank key: normalized distance damped by order age.
    pub weight: f64,
}

/// Predicts a fair price for an arbitrary order using the model fitted
/// during the last classification.
pub struct OrderPredictor {
    model: Box<dyn TrainedModel>,
    price: MinMaxNormalizer,
    // One entry per padded benchmark column; None marks a degenerate
    // column that was excluded from the model input.
    columns: Vec<Option<MinMaxNormalizer>>,
}

impl OrderPredictor {
    pub fn predict_price(&self, order: &MarketOrder) -> Result<Price, TrainingError> {
        if order.benchmarks.len() > self.columns.len() {
            return Err(TrainingError::BenchmarkCountChanged(self.columns.len()));
        }

        let mut row = Vec::with_capacity(self.columns.len());
        for (id, normalizer) in self.columns.iter().enumerate() {
            if let Some(normalizer) = normalizer {
                row.push(normalizer.normalize(order.benchmarks.get(id) as f64));
            }
        }

        let normalized = self.model.predict(&row)?;
        let atto = self.price.denormalize(normalized);
        if !atto.is_finite() {
            return Err(TrainingError::NonFinite);
        }

        Ok(Price(atto.max(0.0) as u128))
    }
}

/// The outcome of a classification pass: every order weighted and the
/// fitted predictor for pricing hardware that was not in the training set.
pub struct Classification {
    pub weighted_orders: Vec<WeightedOrder>,
    pub predictor: OrderPredictor,
}

/// Fits the configured regression model over a set of orders and ranks
/// them by price residual.
pub struct RegressionClassifier {
    model: Box<dyn Model>,
    sigmoid: SigmoidConfig,
    clock: fn() -> u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl RegressionClassifier {
    pub fn new(config: &ModelConfig, sigmoid: SigmoidConfig) -> Self {
        Self {
            model: config.build(),
            sigmoid,
            clock: unix_now,
        }
    }

    /// Same as [`RegressionClassifier::new`], with an injectable clock.
    pub fn with_clock(config: &ModelConfig, sigmoid: SigmoidConfig, clock: fn() -> u64) -> Self {
        Self {
            model: config.build(),
            sigmoid,
            clock,
        }
    }

    pub fn classify(&self, orders: &[MarketOrder]) -> Result<Classification, TrainingError> {
        if orders.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let width = orders
            .iter()
            .map(|order| order.benchmarks.len())
            .max()
            .unwrap_or_default();

        // Benchmark vectors pad with zeros on the right so that orders
        // submitted before a benchmark was introduced stay comparable.
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(orders.len()); width];
        let mut expectation: Vec<f64> = Vec::with_capacity(orders.len());
        for order in orders {
            for (id, column) in columns.iter_mut().enumerate() {
                column.push(order.benchmarks.get(id) as f64);
            }
            expectation.push(order.price.0 as f64);
        }

        let price_normalizer = MinMaxNormalizer::new(&expectation);
        if price_normalizer.is_degenerate() {
            return Err(TrainingError::DegenerateVector);
        }
        price_normalizer.normalize_batch(&mut expectation);

        let normalizers: Vec<Option<MinMaxNormalizer>> = columns
            .iter()
            .map(|column| {
                let normalizer = MinMaxNormalizer::new(column);
                (!normalizer.is_degenerate()).then_some(normalizer)
            })
            .collect();

        let mut training: Vec<Vec<f64>> = vec![Vec::new(); orders.len()];
        for (column, normalizer) in columns.iter().zip(&normalizers) {
            let Some(normalizer) = normalizer else {
                continue;
            };
            for (row, &value) in training.iter_mut().zip(column) {
                row.push(normalizer.normalize(value));
            }
        }

        debug!(
            orders = orders.len(),
            columns = width,
            features = training.first().map(Vec::len).unwrap_or_default(),
            "training order classifier"
        );

        let trained = self.model.train(&training, &expectation)?;

        let mut distances = Vec::with_capacity(orders.len());
        let mut predicted = Vec::with_capacity(orders.len());
        for (row, order) in training.iter().zip(orders) {
            let atto = price_normalizer.denormalize(trained.predict(row)?);
            distances.push(atto - order.price.0 as f64);
            predicted.push(atto);
        }

        let mean = distances.iter().sum::<f64>() / distances.len() as f64;
        let mut weights: Vec<f64> = distances.iter().map(|d| d + mean).collect();

        let weight_normalizer = MinMaxNormalizer::new(&weights);
        if weight_normalizer.is_degenerate() {
            weights.iter_mut().for_each(|w| *w = 0.0);
        } else {
            weight_normalizer.normalize_batch(&mut weights);
        }

        let now = (self.clock)();
        let weighted_orders = orders
            .iter()
            .zip(predicted)
            .zip(distances)
            .zip(weights)
            .map(|(((order, atto), distance), raw_weight)| {
                let weight = raw_weight * self.sigmoid.decay(order.age_secs(now) as f64);
                WeightedOrder {
                    order: order.clone(),
                    predicted_price: Price(if atto.is_finite() { atto.max(0.0) as u128 } else { 0 }),
                    distance,
                    weight: if weight.is_nan() { 0.0 } else { weight },
                }
            })
            .collect();

        Ok(Classification {
            weighted_orders,
            predictor: OrderPredictor {
                model: trained,
                price: price_normalizer,
                columns: normalizers,
            },
        })
    }
}

/// Orders the heaviest (most overpriced relative to the fit) first.
/// NaN weights sink to the end.
pub fn sort_orders(orders: &mut [WeightedOrder]) {
    orders.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use askgrid_core::{Address, BenchmarkVector, NetFlags, OrderId, OrderSide};

    fn order(id: u64, price: u64, benchmarks: Vec<u64>, created_at: u64) -> MarketOrder {
        MarketOrder {
            id: OrderId(id),
            side: OrderSide::Bid,
            author: Address::new("0x1"),
            counterparty: None,
            price: Price(price as u128),
            duration_secs: 0,
            benchmarks: BenchmarkVector::new(benchmarks),
            net_flags: NetFlags::default(),
            created_at,
        }
    }

    fn frozen_clock() -> u64 {
        1_000_000
    }

    #[test]
    fn sigmoid_fixture_values() {
        let sigmoid = SigmoidConfig::default();
        assert!((sigmoid.decay(0.0) - 0.9999546021312976).abs() < 1e-12);
        assert!((sigmoid.decay(43200.0) - 0.5).abs() < 1e-12);
        assert!((sigmoid.decay(86400.0) - 4.5397868702434395e-05).abs() < 1e-12);
    }

    #[test]
    fn classify_ranks_underpriced_orders_higher() {
        // Price is roughly proportional to the first benchmark. Order 42
        // offers far below the trend for its hardware, so the fitted
        // surface sits above its price and it ranks first.
        let mut orders: Vec<MarketOrder> = (0..16)
            .map(|i| {
                order(
                    i,
                    1000 * (i + 1),
                    vec![100 * (i + 1), 7],
                    frozen_clock(),
                )
            })
            .collect();
        orders.push(order(42, 500, vec![1500, 7], frozen_clock()));

        let classifier = RegressionClassifier::with_clock(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            frozen_clock,
        );
        let mut classification = classifier.classify(&orders).unwrap();
        sort_orders(&mut classification.weighted_orders);

        assert_eq!(classification.weighted_orders[0].order.id, OrderId(42));
        assert!(classification.weighted_orders[0].distance > 0.0);
    }

    #[test]
    fn degenerate_columns_are_dropped_from_the_model() {
        // Second benchmark is constant; the predictor must still accept
        // full-width vectors.
        let orders: Vec<MarketOrder> = (0..12)
            .map(|i| order(i, 100 * (i + 1), vec![10 * (i + 1), 5], frozen_clock()))
            .collect();

        let classifier = RegressionClassifier::with_clock(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            frozen_clock,
        );
        let classification = classifier.classify(&orders).unwrap();

        let probe = order(99, 0, vec![55, 5], frozen_clock());
        let predicted = classification.predictor.predict_price(&probe).unwrap();
        assert!(predicted.0 > 0);
    }

    #[test]
    fn predictor_rejects_wider_vectors() {
        let orders: Vec<MarketOrder> = (0..12)
            .map(|i| order(i, 100 * (i + 1), vec![10 * (i + 1)], frozen_clock()))
            .collect();

        let classifier = RegressionClassifier::with_clock(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            frozen_clock,
        );
        let classification = classifier.classify(&orders).unwrap();

        let probe = order(99, 0, vec![55, 1, 2], frozen_clock());
        assert_eq!(
            classification.predictor.predict_price(&probe).err(),
            Some(TrainingError::BenchmarkCountChanged(1))
        );
    }

    #[test]
    fn uniform_prices_are_degenerate() {
        let orders: Vec<MarketOrder> = (0..12)
            .map(|i| order(i, 500, vec![10 * (i + 1)], frozen_clock()))
            .collect();

        let classifier = RegressionClassifier::with_clock(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            frozen_clock,
        );
        assert_eq!(
            classifier.classify(&orders).err(),
            Some(TrainingError::DegenerateVector)
        );
    }

    #[test]
    fn stale_orders_lose_weight() {
        let mut orders: Vec<MarketOrder> = (0..12)
            .map(|i| order(i, 1000 * (i + 1), vec![100 * (i + 1)], frozen_clock()))
            .collect();
        // Same shape and price as order 5 but two days old.
        orders.push(order(77, 6000, vec![600], frozen_clock() - 172_800));

        let classifier = RegressionClassifier::with_clock(
            &ModelConfig::Nnls,
            SigmoidConfig::default(),
            frozen_clock,
        );
        let classification = classifier.classify(&orders).unwrap();

        let fresh = classification
            .weighted_orders
            .iter()
            .find(|w| w.order.id == OrderId(5))
            .unwrap();
        let stale = classification
            .weighted_orders
            .iter()
            .find(|w| w.order.id == OrderId(77))
            .unwrap();
        assert!(stale.weight < fresh.weight || (stale.weight == 0.0 && fresh.weight == 0.0));
    }

    #[test]
    fn sort_puts_nan_free_descending_order() {
        let mut weighted: Vec<WeightedOrder> = [0.2, 0.9, 0.5]
            .iter()
            .enumerate()
            .map(|(i, &weight)| WeightedOrder {
                order: order(i as u64, 1, vec![1], 0),
                predicted_price: Price(0),
                distance: 0.0,
                weight,
            })
            .collect();
        sort_orders(&mut weighted);
        let ids: Vec<u64> = weighted.iter().map(|w| w.order.id.0).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }
}
