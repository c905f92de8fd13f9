//! askgrid-devices — the stateful resource ledger behind knapsack packing.
//!
//! A `DeviceManager` is built per optimization epoch from a worker's full
//! inventory plus its currently free subset. `consume` carves an order's
//! benchmark requirements out of the free capacity, producing the concrete
//! per-device resources of an ask plan; `Exhausted` is expected control
//! flow, not a failure. Exploratory algorithms clone the manager before
//! trying allocations, so no exploration ever observes another's mutations.

pub mod error;
pub mod manager;

pub use error::{ResourceError, ResourceResult};
pub use manager::DeviceManager;
