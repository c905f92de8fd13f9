//! Marketplace collaborator contract and the shared order cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use askgrid_core::{MarketOrder, OrderId};

/// Read access to the open-order book.
#[async_trait]
pub trait MarketScanner: Send + Sync {
    async fn active_orders(&self) -> anyhow::Result<Vec<MarketOrder>>;

    /// Recently dealt orders with their final prices. Training data for
    /// price regression.
    async fn executed_orders(&self) -> anyhow::Result<Vec<MarketOrder>>;

    async fn order_info(&self, id: OrderId) -> anyhow::Result<MarketOrder>;
}

#[derive(Default)]
struct CachedOrders {
    orders: Vec<MarketOrder>,
    updated_at: Option<Instant>,
}

impl CachedOrders {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.updated_at.is_none_or(|at| at.elapsed() >= ttl)
    }
}

/// A communication bus between order fetching and its consumers.
///
/// One daemon manages many workers; each epoch wants the full order book,
/// so fetches are shared and reused within the update interval.
pub struct MarketCache {
    market: Box<dyn MarketScanner>,
    active: Mutex<CachedOrders>,
    executed: Mutex<CachedOrders>,
    update_interval: Duration,
}

impl MarketCache {
    pub fn new(market: Box<dyn MarketScanner>, update_interval: Duration) -> Self {
        Self {
            market,
            active: Mutex::new(CachedOrders::default()),
            executed: Mutex::new(CachedOrders::default()),
            update_interval,
        }
    }

    pub async fn active_orders(&self) -> anyhow::Result<Vec<MarketOrder>> {
        let mut cached = self.active.lock().await;
        if cached.is_stale(self.update_interval) {
            debug!("refreshing active order cache");
            cached.orders = self.market.active_orders().await?;
            cached.updated_at = Some(Instant::now());
        }

        Ok(cached.orders.clone())
    }

    pub async fn executed_orders(&self) -> anyhow::Result<Vec<MarketOrder>> {
        let mut cached = self.executed.lock().await;
        if cached.is_stale(self.update_interval) {
            debug!("refreshing executed order cache");
            cached.orders = self.market.executed_orders().await?;
            cached.updated_at = Some(Instant::now());
        }

        Ok(cached.orders.clone())
    }

    /// Single-order lookups bypass the cache.
    pub async fn order_info(&self, id: OrderId) -> anyhow::Result<MarketOrder> {
        self.market.order_info(id).await
    }
}

/// A fixed in-memory order book, used by simulation mode and tests.
pub struct PredefinedMarket {
    orders: Vec<MarketOrder>,
}

impl PredefinedMarket {
    pub fn new(orders: Vec<MarketOrder>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MarketScanner for PredefinedMarket {
    async fn active_orders(&self) -> anyhow::Result<Vec<MarketOrder>> {
        Ok(self.orders.clone())
    }

    // Simulation feeds the same fixed book to matching and to training.
    async fn executed_orders(&self) -> anyhow::Result<Vec<MarketOrder>> {
        Ok(self.orders.clone())
    }

    async fn order_info(&self, id: OrderId) -> anyhow::Result<MarketOrder> {
        self.orders
            .iter()
            .find(|order| order.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("order {id} not found"))
    }
}
