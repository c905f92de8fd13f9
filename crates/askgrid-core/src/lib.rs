//! askgrid-core — shared data model for the ask-plan optimization engine.
//!
//! A worker's hardware is described as a set of devices (CPU, RAM, storage,
//! network, GPUs), each scored along one or more benchmark dimensions. Buy
//! offers on the marketplace ("orders") request capacity in the same
//! benchmark space. Sell offers ("ask plans") are concrete resource
//! allocations carved out of a worker's inventory and priced per second.
//!
//! # Components
//!
//! - **`benchmarks`** — benchmark vectors and the id → (device class,
//!   splitting algorithm) mapping
//! - **`devices`** — worker device inventory and free-capacity virtualization
//! - **`order`** — market orders and network capability flags
//! - **`plan`** — ask plans and their per-device resource allocations
//! - **`price`** — atto-USD per-second prices and swing thresholds

pub mod benchmarks;
pub mod devices;
pub mod error;
pub mod order;
pub mod plan;
pub mod price;

pub use benchmarks::{BenchmarkId, BenchmarkMapping, BenchmarkVector, DeviceClass, SplittingAlgorithm};
pub use devices::{CpuDevice, DeviceInventory, GpuUnit, NetworkDevice, RamDevice, StorageDevice};
pub use error::CoreError;
pub use order::{Address, MarketOrder, NetFlags, OrderId, OrderSide};
pub use plan::{AskPlan, AskPlanResources, sum_price};
pub use price::{Price, PriceThreshold};
