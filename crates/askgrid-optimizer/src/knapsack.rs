//! The accumulator every solver fills: a device manager plus the sell
//! plans carved out of it so far.

use askgrid_core::{AskPlan, MarketOrder, Price, sum_price};
use askgrid_devices::{DeviceManager, ResourceResult};

/// Owns a device manager clone and the plans consumed from it.
///
/// The resources implied by the contained plans never exceed the manager's
/// original capacity; `put` enforces this transitively through `consume`.
#[derive(Debug, Clone)]
pub struct Knapsack {
    manager: DeviceManager,
    plans: Vec<AskPlan>,
}

impl Knapsack {
    pub fn new(manager: DeviceManager) -> Self {
        Self {
            manager,
            plans: Vec::new(),
        }
    }

    /// Tries to fit the order into the remaining capacity.
    ///
    /// `Exhausted` means the order does not fit; this is expected control
    /// flow, not a failure of the knapsack.
    pub fn put(&mut self, order: &MarketOrder) -> ResourceResult<()> {
        let mut resources = self
            .manager
            .consume(&order.benchmarks, &order.net_flags)?;
        resources.net_flags = order.net_flags;

        self.plans.push(AskPlan {
            id: String::new(),
            order_id: Some(order.id),
            deal_id: None,
            price: order.price,
            duration_secs: order.duration_secs,
            resources,
            created_at: 0,
        });

        Ok(())
    }

    /// Total per-second price of everything packed so far.
    pub fn price(&self) -> Price {
        sum_price(&self.plans)
    }

    pub fn plans(&self) -> &[AskPlan] {
        &self.plans
    }

    pub fn into_plans(self) -> Vec<AskPlan> {
        self.plans
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{knapsack, order};
    use askgrid_devices::ResourceError;

    #[test]
    fn price_grows_with_each_accepted_order() {
        let mut knapsack = knapsack();
        let mut last = Price(0);
        for i in 0..4 {
            knapsack
                .put(&order(i, 100, &[1000, 100 << 20]))
                .unwrap();
            let price = knapsack.price();
            assert!(price > last);
            last = price;
        }
        assert_eq!(knapsack.plans().len(), 4);
        assert_eq!(last, Price(400));
    }

    #[test]
    fn rejected_orders_leave_plans_untouched() {
        let mut knapsack = knapsack();
        knapsack.put(&order(0, 100, &[1000, 100 << 20])).unwrap();
        let err = knapsack.put(&order(1, 100, &[1_000_000, 100 << 20]));
        assert_eq!(err, Err(ResourceError::Exhausted));
        assert_eq!(knapsack.plans().len(), 1);
        assert_eq!(knapsack.price(), Price(100));
    }

    #[test]
    fn clones_explore_independently() {
        let mut knapsack = knapsack();
        let mut branch = knapsack.clone();
        branch.put(&order(0, 100, &[1000, 100 << 20])).unwrap();
        assert!(knapsack.plans().is_empty());
        knapsack.put(&order(1, 50, &[500, 50 << 20])).unwrap();
        assert_eq!(branch.plans().len(), 1);
        assert_eq!(branch.plans()[0].order_id, Some(askgrid_core::OrderId(0)));
    }
}
