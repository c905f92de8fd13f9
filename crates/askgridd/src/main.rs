//! askgridd — the askgrid daemon.
//!
//! Drives sell-plan optimization for a fleet of workers against a
//! marketplace. This build ships a simulation mode: market and workers
//! come from a scenario file, every mutation is recorded instead of
//! applied, and the daemon reports what it would have done.
//!
//! # Usage
//!
//! ```text
//! askgridd simulate --config askgridd.toml --epochs 3
//! askgridd predict --config askgridd.toml
//! ```

mod config;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use askgrid_core::{sum_price, Address};
use askgrid_engine::{
    Blacklist, MarketCache, MockWorker, PredefinedMarket, PredictorService, ReadOnlyWorker,
    StaticBlacklist, WorkerEngine, WorkerManagement,
};

use crate::config::{Config, Scenario};

#[derive(Parser)]
#[command(name = "askgridd", about = "askgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay optimization epochs against a scenario file and report the
    /// plans each worker would post.
    Simulate {
        /// Path to the TOML configuration.
        #[arg(long, default_value = "askgridd.toml")]
        config: PathBuf,

        /// How many epochs to run per worker.
        #[arg(long, default_value = "1")]
        epochs: usize,
    },

    /// Fit the price model over the scenario's orders and predict what
    /// each worker's hardware would earn.
    Predict {
        /// Path to the TOML configuration.
        #[arg(long, default_value = "askgridd.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,askgridd=debug,askgrid=debug".parse().expect("static filter")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate { config, epochs } => simulate(&config, epochs).await,
        Command::Predict { config } => predict(&config).await,
    }
}

async fn simulate(config: &Path, epochs: usize) -> anyhow::Result<()> {
    let cfg = Config::load(config)?;
    let scenario = Scenario::load(&cfg.scenario)?;
    let mapping = cfg.benchmark_mapping()?;

    info!(
        orders = scenario.orders.len(),
        workers = cfg.workers.len(),
        "starting simulation"
    );

    let market = Arc::new(MarketCache::new(
        Box::new(PredefinedMarket::new(scenario.orders.clone())),
        cfg.marketplace.update_interval(),
    ));
    let blacklist: Arc<dyn Blacklist> = Arc::new(StaticBlacklist::new(cfg.blacklist.clone()));

    for (addr, engine_cfg) in &cfg.workers {
        let devices = scenario
            .devices
            .get(addr)
            .with_context(|| format!("scenario has no devices for worker `{addr}`"))?;
        let plans: HashMap<_, _> = scenario
            .plans
            .get(addr)
            .into_iter()
            .flatten()
            .map(|plan| (plan.id.clone(), plan.clone()))
            .collect();

        let worker = Arc::new(ReadOnlyWorker::new(MockWorker::with_plans(
            devices.clone(),
            plans,
        )));
        let engine = WorkerEngine::new(
            engine_cfg.clone(),
            Address::new(addr),
            cfg.master.clone(),
            Arc::clone(&blacklist),
            Arc::clone(&worker) as Arc<dyn WorkerManagement>,
            Arc::clone(&market),
            Arc::clone(&mapping),
        );

        for epoch in 0..epochs {
            info!(worker = %addr, epoch, "running simulated epoch");
            engine.execute().await;
        }

        let created = worker.created_plans();
        let removed = worker.removed_ids();
        info!(
            worker = %addr,
            created = created.len(),
            removed = removed.len(),
            income = %sum_price(&created),
            "simulation finished for worker"
        );
        for plan in &created {
            info!(worker = %addr, order = ?plan.order_id, price = %plan.price, "would post sell plan");
        }
        for id in &removed {
            info!(worker = %addr, plan = %id, "would remove sell plan");
        }
    }

    Ok(())
}

async fn predict(config: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(config)?;
    let scenario = Scenario::load(&cfg.scenario)?;
    let mapping = cfg.benchmark_mapping()?;

    let market = Arc::new(MarketCache::new(
        Box::new(PredefinedMarket::new(scenario.orders.clone())),
        cfg.marketplace.update_interval(),
    ));
    let service = PredictorService::new(Arc::clone(&market), mapping);
    service.update().await?;

    for addr in cfg.workers.keys() {
        let devices = scenario
            .devices
            .get(addr)
            .with_context(|| format!("scenario has no devices for worker `{addr}`"))?;

        let prediction = service.predict_supplier(devices.clone()).await?;
        info!(
            worker = %addr,
            income = %prediction.price,
            orders = prediction.order_ids.len(),
            "predicted supplier income"
        );
    }

    Ok(())
}
