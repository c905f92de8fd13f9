//! Knapsack solvers that turn a pool of market bids into sell plans.
//!
//! Every strategy shares one contract: [`OptimizationMethod::optimize`]
//! fills the given [`Knapsack`] from candidate orders and errors only on
//! unrecoverable failure, never on "knapsack full". Strategies:
//!
//! - [`GreedyRegressionModel`] — classifier-ranked greedy fill.
//! - [`BranchBoundModel`] — exact depth-limited tree search.
//! - [`GeneticModel`] — evolutionary search with two genome encodings.
//! - [`BatchModel`] — races several strategies, keeps the best result.

pub mod batch;
pub mod branch_bound;
pub mod config;
pub mod error;
pub mod genetic;
pub mod greedy;
pub mod knapsack;

pub use batch::BatchModel;
pub use branch_bound::BranchBoundModel;
pub use config::MethodConfig;
pub use error::{OptimizeError, OptimizeResult};
pub use genetic::{GeneticModel, GenomeKind};
pub use greedy::GreedyRegressionModel;
pub use knapsack::Knapsack;

use askgrid_core::MarketOrder;

/// Fewest known orders required before a regression is worth fitting.
pub const MIN_TRAINING_ORDERS: usize = 12;

/// A strategy that fills a knapsack from candidate orders.
///
/// Implementations mutate the knapsack in place, replacing its state with
/// the best allocation found.
pub trait OptimizationMethod: Send + Sync {
    fn optimize(&self, knapsack: &mut Knapsack, orders: &[MarketOrder]) -> OptimizeResult<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use askgrid_core::benchmarks::{
        BenchmarkDescriptor, BenchmarkMapping, DeviceClass, SplittingAlgorithm,
    };
    use askgrid_core::{
        Address, BenchmarkVector, CpuDevice, DeviceInventory, MarketOrder, NetFlags, OrderId,
        OrderSide, Price, RamDevice,
    };
    use askgrid_devices::DeviceManager;

    use crate::Knapsack;

    // Slots: 0 CPU (proportional), 1 RAM (proportional).
    pub(crate) fn mapping() -> Arc<BenchmarkMapping> {
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

    // Two cores at 10000 each, a gigabyte of RAM.
    pub(crate) fn inventory() -> Arc<DeviceInventory> {
        Arc::new(DeviceInventory {
            cpu: CpuDevice {
                cores: 2,
                benchmarks: BTreeMap::from([(0, 20_000)]),
            },
            ram: RamDevice {
                bytes: 1_000_000_000,
                benchmarks: BTreeMap::from([(1, 1_000_000_000)]),
            },
            ..Default::default()
        })
    }

    pub(crate) fn manager() -> DeviceManager {
        let devices = inventory();
        DeviceManager::new(devices.clone(), &devices, mapping())
    }

    pub(crate) fn knapsack() -> Knapsack {
        Knapsack::new(manager())
    }

    pub(crate) fn order(id: u64, price: u128, benchmarks: &[u64]) -> MarketOrder {
        MarketOrder {
            id: OrderId(id),
            side: OrderSide::Bid,
            author: Address::new("0x1"),
            counterparty: None,
            price: Price(price),
            duration_secs: 0,
            benchmarks: BenchmarkVector::new(benchmarks.to_vec()),
            net_flags: NetFlags::default(),
            created_at: 0,
        }
    }
}
