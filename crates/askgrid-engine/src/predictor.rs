//! Price prediction: a regression over recently executed orders, plus a
//! what-if engine run that prices an entire device inventory.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use askgrid_core::benchmarks::BenchmarkMapping;
use askgrid_core::{sum_price, Address, DeviceInventory, MarketOrder, OrderId, Price, PriceThreshold};
use askgrid_regression::{Classification, ModelConfig, RegressionClassifier, SigmoidConfig};

use crate::blacklist::EmptyBlacklist;
use crate::engine::{EngineConfig, OrderPolicy, WorkerEngine};
use crate::market::MarketCache;
use crate::worker::MockWorker;

/// The outcome of pricing a hypothetical supplier: the total income per
/// second and the orders it would serve.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierPrediction {
    pub price: Price,
    pub order_ids: Vec<OrderId>,
}

/// Keeps a price regression fitted over the latest executed orders and
/// answers price queries from it.
pub struct PredictorService {
    classifier: RegressionClassifier,
    market: Arc<MarketCache>,
    mapping: Arc<BenchmarkMapping>,
    classification: RwLock<Option<Classification>>,
}

impl PredictorService {
    pub fn new(market: Arc<MarketCache>, mapping: Arc<BenchmarkMapping>) -> Self {
        Self {
            // Non-negative least squares; a price surface with negative
            // benchmark contributions makes no sense.
            classifier: RegressionClassifier::new(&ModelConfig::Nnls, SigmoidConfig::default()),
            market,
            mapping,
            classification: RwLock::new(None),
        }
    }

    /// Refits the regression over the market's executed orders.
    pub async fn update(&self) -> anyhow::Result<()> {
        let orders = self
            .market
            .executed_orders()
            .await
            .context("failed to pull executed orders")?;
        anyhow::ensure!(!orders.is_empty(), "market returned no executed orders");

        let classification = self.classifier.classify(&orders)?;
        info!(
            orders = classification.weighted_orders.len(),
            "refitted the price model"
        );
        *self
            .classification
            .write()
            .expect("classification lock poisoned") = Some(classification);
        Ok(())
    }

    /// Refits periodically until cancelled.
    pub async fn run(&self, update_interval: Duration) {
        let mut timer = tokio::time::interval(update_interval);
        loop {
            timer.tick().await;
            if let Err(err) = self.update().await {
                warn!(error = %err, "failed to update the price model");
            }
        }
    }

    /// Prices a single order from the fitted regression.
    pub fn predict(&self, order: &MarketOrder) -> anyhow::Result<Price> {
        let guard = self
            .classification
            .read()
            .expect("classification lock poisoned");
        let classification = guard
            .as_ref()
            .context("price model is not fitted yet, try again later")?;
        Ok(classification.predictor.predict_price(order)?)
    }

    /// Prices a whole inventory by running one optimization epoch against
    /// an in-memory worker and summing the plans it would post.
    pub async fn predict_supplier(
        &self,
        devices: DeviceInventory,
    ) -> anyhow::Result<SupplierPrediction> {
        let worker = Arc::new(MockWorker::new(devices));
        let cfg = EngineConfig {
            order_policy: OrderPolicy::SpotOnly,
            dry_run: false,
            price_threshold: PriceThreshold::relative(5.0)
                .context("failed to build the price threshold")?,
            stale_threshold: Duration::from_secs(300),
            prelude_timeout: Duration::from_secs(30),
            removal_timeout: Duration::from_secs(60),
            optimization: None,
        };
        let engine = WorkerEngine::new(
            cfg,
            Address::default(),
            Address::default(),
            Arc::new(EmptyBlacklist),
            Arc::clone(&worker) as Arc<dyn crate::worker::WorkerManagement>,
            Arc::clone(&self.market),
            Arc::clone(&self.mapping),
        );
        engine.try_execute().await?;

        let plans = worker.created_plans();
        Ok(SupplierPrediction {
            price: sum_price(&plans),
            order_ids: plans.iter().filter_map(|plan| plan.order_id).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use askgrid_core::benchmarks::{BenchmarkDescriptor, DeviceClass, SplittingAlgorithm};
    use askgrid_core::{BenchmarkVector, CpuDevice, NetFlags, OrderSide, RamDevice};

    use super::*;
    use crate::market::PredefinedMarket;

    fn mapping() -> Arc<BenchmarkMapping> {
        let mut descriptors = BTreeMap::new();
        descriptors.insert(
            0,
            BenchmarkDescriptor {
                class: DeviceClass::Cpu,
                splitting: SplittingAlgorithm::Proportional,
            },
        );
        descriptors.insert(
            1,
            BenchmarkDescriptor {
                class: DeviceClass::Ram,
                splitting: SplittingAlgorithm::Proportional,
            },
        );
        Arc::new(BenchmarkMapping::new(descriptors, None))
    }

    fn order(id: u64, price: u128, benchmarks: &[u64]) -> MarketOrder {
        MarketOrder {
            id: OrderId(id),
            side: OrderSide::Bid,
            author: Address::new("0xbuyer"),
            counterparty: None,
            price: Price(price),
            duration_secs: 0,
            benchmarks: BenchmarkVector::new(benchmarks.to_vec()),
            net_flags: NetFlags::default(),
            created_at: 0,
        }
    }

    fn market(orders: Vec<MarketOrder>) -> Arc<MarketCache> {
        Arc::new(MarketCache::new(
            Box::new(PredefinedMarket::new(orders)),
            Duration::from_secs(60),
        ))
    }

    // Prices grow linearly with the CPU benchmark, so a mid-range query
    // must price between its neighbours.
    #[tokio::test]
    async fn fitted_model_prices_unseen_hardware() {
        let orders: Vec<MarketOrder> = (1..=8)
            .map(|i| order(i, (i as u128) * 1_000, &[i * 1_000, 500_000_000]))
            .collect();
        let service = PredictorService::new(market(orders), mapping());

        service.update().await.unwrap();

        let price = service
            .predict(&order(100, 0, &[4_500, 500_000_000]))
            .unwrap();
        assert!(price > Price(3_000) && price < Price(6_000), "{price}");
    }

    #[tokio::test]
    async fn prediction_requires_a_fitted_model() {
        let service = PredictorService::new(market(Vec::new()), mapping());

        assert!(service.update().await.is_err());
        assert!(service.predict(&order(1, 0, &[1_000, 1_000])).is_err());
    }

    #[tokio::test]
    async fn supplier_prediction_sums_the_packed_plans() {
        let orders = vec![
            order(1, 100, &[10_000, 400_000_000]),
            order(2, 80, &[10_000, 400_000_000]),
        ];
        let service = PredictorService::new(market(orders), mapping());

        let devices = DeviceInventory {
            cpu: CpuDevice {
                cores: 2,
                benchmarks: BTreeMap::from([(0, 20_000)]),
            },
            ram: RamDevice {
                bytes: 1_000_000_000,
                benchmarks: BTreeMap::from([(1, 1_000_000_000)]),
            },
            ..Default::default()
        };

        let prediction = service.predict_supplier(devices).await.unwrap();
        assert_eq!(prediction.price, Price(180));
        assert_eq!(prediction.order_ids.len(), 2);
    }
}
