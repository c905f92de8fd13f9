//! Worker orchestration: epoch-driven ask-plan management and price
//! prediction on top of the optimizer.
//!
//! A [`WorkerEngine`] owns one worker. Each epoch it pulls the order book
//! and the worker's current state, packs the free devices with the most
//! profitable matching bids, and either appends new sell plans or tears
//! down the existing spot plans for a better set. A [`PredictorService`]
//! reuses the same machinery against an in-memory worker to answer
//! "what would this hardware earn" without touching anything real.

pub mod blacklist;
pub mod engine;
pub mod market;
pub mod predictor;
pub mod worker;

pub use blacklist::{Blacklist, EmptyBlacklist, StaticBlacklist};
pub use engine::{remove_duplicates, split_plans, EngineConfig, OrderPolicy, WorkerEngine};
pub use market::{MarketCache, MarketScanner, PredefinedMarket};
pub use predictor::{PredictorService, SupplierPrediction};
pub use worker::{
    remove_ask_plans, MockWorker, NamedErrorGroup, ReadOnlyWorker, WorkerManagement,
};
