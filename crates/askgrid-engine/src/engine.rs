//! The per-worker optimization epoch: pull market orders and worker state,
//! pack the free devices, then reshape the worker's ask plans to match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use askgrid_core::benchmarks::BenchmarkMapping;
use askgrid_core::{
    sum_price, Address, AskPlan, DeviceInventory, MarketOrder, OrderSide, Price, PriceThreshold,
};
use askgrid_devices::DeviceManager;
use askgrid_optimizer::{Knapsack, MethodConfig, OptimizationMethod};

use crate::blacklist::Blacklist;
use crate::market::MarketCache;
use crate::worker::{remove_ask_plans, WorkerManagement};

/// Which bids a worker is willing to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// Only open-ended spot orders.
    #[default]
    SpotOnly,
}

/// Per-worker tuning for the optimization epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub order_policy: OrderPolicy,
    /// Plan selection runs, but nothing is sent to the worker.
    #[serde(default)]
    pub dry_run: bool,
    /// How much better the reshaped plan set must price before live plans
    /// are torn down and replaced.
    pub price_threshold: PriceThreshold,
    /// Plans unsold for at least this long are reaped before optimizing.
    #[serde(default = "default_stale_threshold", with = "duration_secs")]
    pub stale_threshold: Duration,
    /// Budget for pulling orders, devices and plans at the epoch start.
    #[serde(default = "default_prelude_timeout", with = "duration_secs")]
    pub prelude_timeout: Duration,
    /// Budget for confirming plan removal on the worker.
    #[serde(default = "default_removal_timeout", with = "duration_secs")]
    pub removal_timeout: Duration,
    /// Explicit method selection; when absent the method is picked from the
    /// matched order count.
    #[serde(default)]
    pub optimization: Option<MethodConfig>,
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(300)
}

fn default_prelude_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_removal_timeout() -> Duration {
    Duration::from_secs(60)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Snapshot of everything an epoch needs, gathered up front so the whole
/// epoch reasons about one consistent state.
struct OptimizationInput {
    orders: Vec<MarketOrder>,
    devices: DeviceInventory,
    plans: HashMap<String, AskPlan>,
}

impl OptimizationInput {
    /// Live plans that may be sacrificed for a better packing. Plans backing
    /// forward deals keep their term; only spot plans are negotiable.
    fn victim_plans(&self) -> HashMap<String, AskPlan> {
        self.plans
            .iter()
            .filter(|(_, plan)| plan.is_spot())
            .map(|(id, plan)| (id.clone(), plan.clone()))
            .collect()
    }

    fn current_price(&self) -> Price {
        sum_price(self.plans.values())
    }

    /// Devices not claimed by any live plan.
    fn free_devices(&self) -> anyhow::Result<DeviceInventory> {
        self.free(&HashSet::new())
    }

    /// Devices as they would look with every victim plan torn down.
    fn virtual_free_devices(&self, victims: &HashMap<String, AskPlan>) -> anyhow::Result<DeviceInventory> {
        self.free(&victims.keys().cloned().collect())
    }

    fn free(&self, released: &HashSet<String>) -> anyhow::Result<DeviceInventory> {
        let mut resources = self.devices.ask_plan_resources();
        for (id, plan) in &self.plans {
            if !released.contains(id) {
                resources
                    .sub(&plan.resources)
                    .with_context(|| format!("failed to release resources of plan `{id}`"))?;
            }
        }

        Ok(self.devices.limit_to(&resources))
    }
}

/// Drives one worker: each epoch it matches market bids against the worker's
/// free devices and reshapes the ask plans accordingly.
pub struct WorkerEngine {
    cfg: EngineConfig,
    addr: Address,
    master_addr: Address,
    blacklist: Arc<dyn Blacklist>,
    worker: Arc<dyn WorkerManagement>,
    market: Arc<MarketCache>,
    mapping: Arc<BenchmarkMapping>,
    clock: fn() -> u64,
}

impl WorkerEngine {
    pub fn new(
        cfg: EngineConfig,
        addr: Address,
        master_addr: Address,
        blacklist: Arc<dyn Blacklist>,
        worker: Arc<dyn WorkerManagement>,
        market: Arc<MarketCache>,
        mapping: Arc<BenchmarkMapping>,
    ) -> Self {
        Self {
            cfg,
            addr,
            master_addr,
            blacklist,
            worker,
            market,
            mapping,
            clock: unix_now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Runs one epoch, logging rather than propagating failure. An epoch
    /// that goes wrong leaves the worker as it was and waits for the next.
    pub async fn execute(&self) {
        info!(worker = %self.addr, "optimization epoch started");
        match self.try_execute().await {
            Ok(()) => info!(worker = %self.addr, "optimization epoch finished"),
            Err(err) => warn!(worker = %self.addr, error = %err, "optimization epoch failed"),
        }
    }

    pub async fn try_execute(&self) -> anyhow::Result<()> {
        let input = loop {
            let input = self.optimization_input().await?;
            let reaped = self.try_remove_unsold_plans(&input.plans).await?;
            if reaped == 0 {
                break input;
            }
            debug!(count = reaped, "restarting epoch after reaping unsold plans");
        };

        let victims = input.victim_plans();
        let natural_free = input.free_devices()?;
        let virtual_free = input.virtual_free_devices(&victims)?;

        let victim_orders = self.orders_for_plans(&victims).await?;
        let mut extended_orders = input.orders.clone();
        extended_orders.extend(victim_orders);

        let devices = Arc::new(input.devices.clone());
        let (natural, replaced) = tokio::try_join!(
            self.optimize(Arc::clone(&devices), natural_free, input.orders.clone(), "append"),
            self.optimize(Arc::clone(&devices), virtual_free, extended_orders, "replace"),
        )?;

        let current_price = input.current_price();
        info!(
            current = %current_price,
            append = %natural.price(),
            replace = %replaced.price(),
            "computed allocation prices"
        );

        if self.cfg.dry_run {
            anyhow::bail!("dry-run mode is active, worker state left untouched");
        }

        let winners = if self.cfg.price_threshold.exceeds(replaced.price(), current_price) {
            info!("replacing live spot plans with a better allocation");
            let (create, remove, ignored) = split_plans(&input.plans, replaced.plans());
            let (create, remove) = remove_duplicates(create, remove);
            debug!(count = ignored.len(), "keeping plans already matching the allocation");

            let ids: Vec<String> = remove.iter().map(|plan| plan.id.clone()).collect();
            if !ids.is_empty() {
                remove_ask_plans(
                    self.worker.as_ref(),
                    &ids,
                    self.cfg.removal_timeout,
                    Duration::from_secs(1),
                )
                .await
                .context("failed to remove outplayed plans")?;
            }
            create
        } else {
            info!("appending plans over untouched free devices");
            natural.plans().to_vec()
        };

        if winners.is_empty() {
            anyhow::bail!("no sell plans found");
        }

        for plan in &winners {
            match self.worker.create_ask_plan(plan.clone()).await {
                Ok(id) => info!(plan = %id, price = %plan.price, "created sell plan"),
                Err(err) => warn!(error = %err, "failed to create sell plan"),
            }
        }

        Ok(())
    }

    async fn optimization_input(&self) -> anyhow::Result<OptimizationInput> {
        let gather = async {
            tokio::try_join!(
                async {
                    let orders = self
                        .market
                        .active_orders()
                        .await
                        .context("failed to pull market orders")?;
                    anyhow::ensure!(!orders.is_empty(), "market returned no orders to match");
                    Ok::<_, anyhow::Error>(orders)
                },
                async {
                    self.worker
                        .devices()
                        .await
                        .context("failed to pull worker devices")
                },
                async {
                    self.worker
                        .ask_plans()
                        .await
                        .context("failed to pull worker ask plans")
                },
            )
        };

        let (orders, devices, plans) = tokio::time::timeout(self.cfg.prelude_timeout, gather)
            .await
            .context("timed out gathering optimization input")??;

        debug!(
            orders = orders.len(),
            plans = plans.len(),
            "gathered optimization input"
        );
        Ok(OptimizationInput {
            orders,
            devices,
            plans,
        })
    }

    /// Reaps spot plans nobody bought for longer than the stale threshold,
    /// returning how many were removed.
    async fn try_remove_unsold_plans(
        &self,
        plans: &HashMap<String, AskPlan>,
    ) -> anyhow::Result<usize> {
        let now = (self.clock)();
        let stale: Vec<String> = plans
            .iter()
            .filter(|(_, plan)| plan.unsold_duration(now) >= self.cfg.stale_threshold.as_secs())
            .map(|(id, _)| id.clone())
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        info!(count = stale.len(), "removing stale unsold plans");
        remove_ask_plans(
            self.worker.as_ref(),
            &stale,
            self.cfg.removal_timeout,
            Duration::from_secs(1),
        )
        .await
        .context("failed to remove stale plans")?;
        Ok(stale.len())
    }

    /// Pulls back the market orders the victim plans were posted against, so
    /// the replacement packing competes with what it would displace.
    async fn orders_for_plans(
        &self,
        plans: &HashMap<String, AskPlan>,
    ) -> anyhow::Result<Vec<MarketOrder>> {
        let lookups = plans
            .iter()
            .filter_map(|(id, plan)| plan.order_id.map(|order_id| (id.clone(), order_id)))
            .map(|(id, order_id)| async move {
                self.market
                    .order_info(order_id)
                    .await
                    .with_context(|| format!("failed to pull order backing plan `{id}`"))
            });

        join_all(lookups).await.into_iter().collect()
    }

    async fn optimize(
        &self,
        devices: Arc<DeviceInventory>,
        free: DeviceInventory,
        orders: Vec<MarketOrder>,
        label: &'static str,
    ) -> anyhow::Result<Knapsack> {
        let task = OptimizeTask {
            devices,
            free,
            orders,
            mapping: Arc::clone(&self.mapping),
            blacklist: Arc::clone(&self.blacklist),
            policy: self.cfg.order_policy,
            addr: self.addr.clone(),
            master_addr: self.master_addr.clone(),
            method: self.cfg.optimization.clone(),
            label,
        };

        tokio::task::spawn_blocking(move || task.run())
            .await
            .context("optimization task panicked")?
    }
}

/// Owned slice of engine state handed to a blocking optimization task.
struct OptimizeTask {
    devices: Arc<DeviceInventory>,
    free: DeviceInventory,
    orders: Vec<MarketOrder>,
    mapping: Arc<BenchmarkMapping>,
    blacklist: Arc<dyn Blacklist>,
    policy: OrderPolicy,
    addr: Address,
    master_addr: Address,
    method: Option<MethodConfig>,
    label: &'static str,
}

impl OptimizeTask {
    fn run(self) -> anyhow::Result<Knapsack> {
        let manager = DeviceManager::new(
            Arc::clone(&self.devices),
            &self.free,
            Arc::clone(&self.mapping),
        );
        let matched = self.matching_orders(&manager);
        info!(
            optimization = self.label,
            matched = matched.len(),
            total = self.orders.len(),
            "filtered matching orders"
        );

        let mut knapsack = Knapsack::new(manager);
        if matched.is_empty() {
            return Ok(knapsack);
        }

        let method = self
            .method
            .clone()
            .unwrap_or_else(|| MethodConfig::default_for(matched.len()));
        let started = Instant::now();
        method
            .create(&self.orders)
            .optimize(&mut knapsack, &matched)
            .with_context(|| format!("{} optimization failed", self.label))?;
        info!(
            optimization = self.label,
            plans = knapsack.plans().len(),
            price = %knapsack.price(),
            elapsed = ?started.elapsed(),
            "optimized orders"
        );

        Ok(knapsack)
    }

    fn matching_orders(&self, manager: &DeviceManager) -> Vec<MarketOrder> {
        self.orders
            .iter()
            .filter(|order| self.matches(manager, order))
            .cloned()
            .collect()
    }

    fn matches(&self, manager: &DeviceManager, order: &MarketOrder) -> bool {
        if order.side != OrderSide::Bid {
            return false;
        }
        match self.policy {
            OrderPolicy::SpotOnly => {
                if !order.is_spot() {
                    return false;
                }
            }
        }
        if !self.devices.network.net_flags.supports(&order.net_flags) {
            return false;
        }
        if let Some(counterparty) = &order.counterparty {
            if !counterparty.is_zero()
                && counterparty != &self.addr
                && counterparty != &self.master_addr
            {
                return false;
            }
        }
        if !self.blacklist.is_allowed(&order.author) {
            return false;
        }

        manager.contains(&order.benchmarks, &order.net_flags)
    }
}

/// Partitions a candidate allocation against the live plans by order id:
/// candidates for orders nobody serves yet must be created, live plans whose
/// orders fell out of the allocation must be removed, the overlap is kept.
pub fn split_plans(
    plans: &HashMap<String, AskPlan>,
    candidates: &[AskPlan],
) -> (Vec<AskPlan>, Vec<AskPlan>, Vec<AskPlan>) {
    let live_orders: HashSet<_> = plans.values().filter_map(|plan| plan.order_id).collect();
    let candidate_orders: HashSet<_> = candidates.iter().filter_map(|plan| plan.order_id).collect();

    let mut create = Vec::new();
    let mut ignore = Vec::new();
    for candidate in candidates {
        match candidate.order_id {
            Some(id) if live_orders.contains(&id) => ignore.push(candidate.clone()),
            _ => create.push(candidate.clone()),
        }
    }

    let remove = plans
        .values()
        .filter(|plan| match plan.order_id {
            Some(id) => !candidate_orders.contains(&id),
            None => true,
        })
        .cloned()
        .collect();

    (create, remove, ignore)
}

/// Cancels out create/remove pairs that describe the same allocation shape,
/// so equivalent plans are not churned through the worker. Both lists are
/// returned sorted by price.
pub fn remove_duplicates(
    mut create: Vec<AskPlan>,
    mut remove: Vec<AskPlan>,
) -> (Vec<AskPlan>, Vec<AskPlan>) {
    create.sort_by(|a, b| a.price.cmp(&b.price));
    remove.sort_by(|a, b| a.price.cmp(&b.price));

    let mut kept_create = Vec::new();
    let mut kept_remove = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < create.len() && j < remove.len() {
        if create[i].price < remove[j].price {
            kept_create.push(create[i].clone());
            i += 1;
        } else if remove[j].price < create[i].price {
            kept_remove.push(remove[j].clone());
            j += 1;
        } else {
            // Equal-price run: shapes may be ordered arbitrarily within it,
            // so cancellation must match pairwise across the whole run.
            let price = create[i].price;
            let create_start = i;
            while i < create.len() && create[i].price == price {
                i += 1;
            }
            let remove_start = j;
            while j < remove.len() && remove[j].price == price {
                j += 1;
            }

            let mut run: Vec<AskPlan> = remove[remove_start..j].to_vec();
            for plan in &create[create_start..i] {
                match run.iter().position(|other| other.same_shape(plan)) {
                    Some(pos) => {
                        run.remove(pos);
                    }
                    None => kept_create.push(plan.clone()),
                }
            }
            kept_remove.extend(run);
        }
    }
    kept_create.extend_from_slice(&create[i..]);
    kept_remove.extend_from_slice(&remove[j..]);

    (kept_create, kept_remove)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
