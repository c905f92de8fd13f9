//! Daemon configuration: a TOML file describing the marketplace, the
//! benchmark slot layout and each managed worker, plus the JSON scenario
//! file that simulation mode replays.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use askgrid_core::benchmarks::{BenchmarkDescriptor, BenchmarkMapping};
use askgrid_core::{Address, AskPlan, DeviceInventory, MarketOrder};
use askgrid_engine::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The daemon's master address; workers accept counterparty-restricted
    /// bids naming it.
    pub master: Address,
    /// Path to the scenario file replayed by simulation mode.
    pub scenario: PathBuf,
    /// Bid authors to refuse, regardless of price.
    #[serde(default)]
    pub blacklist: Vec<Address>,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    pub benchmarks: BenchmarksConfig,
    #[serde(default)]
    pub predictor: Option<PredictorConfig>,
    /// Per-worker engine tuning, keyed by worker address.
    pub workers: BTreeMap<String, EngineConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at `{}`", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at `{}`", path.display()))
    }

    pub fn benchmark_mapping(&self) -> anyhow::Result<Arc<BenchmarkMapping>> {
        let mut slots = BTreeMap::new();
        for (id, descriptor) in &self.benchmarks.slots {
            let id: usize = id
                .parse()
                .with_context(|| format!("benchmark slot `{id}` is not a number"))?;
            slots.insert(id, *descriptor);
        }

        Ok(Arc::new(BenchmarkMapping::new(
            slots,
            self.benchmarks.gpu_count_slot,
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// How long fetched order books stay fresh.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
}

impl MarketplaceConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval_secs(),
        }
    }
}

fn default_update_interval_secs() -> u64 {
    60
}

/// The benchmark slot registry: which device class each slot measures and
/// how it splits across plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarksConfig {
    /// Slot id (as a TOML table key) to descriptor.
    pub slots: BTreeMap<String, BenchmarkDescriptor>,
    #[serde(default)]
    pub gpu_count_slot: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
}

/// A fixed market and worker fleet for simulation: the order book every
/// epoch sees, each worker's hardware and optionally its live plans.
///
/// Orders backing pre-seeded plans must be present in `orders`, otherwise
/// the replacement path cannot price what it would displace. Plans carry
/// real `created_at` timestamps; a plan dated far in the past counts as
/// stale and is reaped before the first optimization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub orders: Vec<MarketOrder>,
    pub devices: BTreeMap<String, DeviceInventory>,
    #[serde(default)]
    pub plans: BTreeMap<String, Vec<AskPlan>>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario at `{}`", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse scenario at `{}`", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        master = "0xmaster"
        scenario = "scenario.json"
        blacklist = ["0xbad"]

        [marketplace]
        update_interval_secs = 30

        [benchmarks.slots.0]
        class = "cpu"
        splitting = "proportional"

        [benchmarks.slots.1]
        class = "ram"
        splitting = "proportional"

        [predictor]
        update_interval_secs = 120

        [workers."0xworker"]
        price_threshold = "5%"
        dry_run = true

        [workers."0xworker".optimization]
        type = "branch_bound"
        depth_limit = 4
    "#;

    #[test]
    fn sample_config_parses() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();

        assert_eq!(cfg.master, Address::new("0xmaster"));
        assert_eq!(cfg.blacklist.len(), 1);
        assert_eq!(cfg.marketplace.update_interval(), Duration::from_secs(30));
        assert_eq!(cfg.benchmark_mapping().unwrap().len(), 2);
        assert_eq!(cfg.predictor.unwrap().update_interval_secs, 120);

        let worker = &cfg.workers["0xworker"];
        assert!(worker.dry_run);
        assert!(worker.optimization.is_some());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askgridd.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.scenario, PathBuf::from("scenario.json"));
    }

    #[test]
    fn malformed_thresholds_are_rejected() {
        let broken = SAMPLE.replace("\"5%\"", "\"five percent\"");
        assert!(toml::from_str::<Config>(&broken).is_err());
    }

    #[test]
    fn unknown_method_tags_are_rejected() {
        let broken = SAMPLE.replace("branch_bound", "simulated_annealing");
        assert!(toml::from_str::<Config>(&broken).is_err());
    }

    #[test]
    fn scenario_round_trips_through_json() {
        let scenario = Scenario {
            orders: Vec::new(),
            devices: BTreeMap::from([("0xworker".to_string(), DeviceInventory::default())]),
            plans: BTreeMap::new(),
        };

        let raw = serde_json::to_string(&scenario).unwrap();
        let parsed: Scenario = serde_json::from_str(&raw).unwrap();
        assert!(parsed.devices.contains_key("0xworker"));
    }
}
