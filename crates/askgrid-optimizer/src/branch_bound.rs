//! Exact depth-limited branch-and-bound search.
//!
//! Exponential in the candidate count, so only used for small pools.

use tracing::debug;

use askgrid_core::{MarketOrder, Price};

use crate::OptimizationMethod;
use crate::error::{OptimizeError, OptimizeResult};
use crate::knapsack::Knapsack;

pub const DEFAULT_DEPTH_LIMIT: usize = 6;

pub struct BranchBoundModel {
    /// Caps the number of orders any single allocation may contain.
    pub depth_limit: usize,
}

impl Default for BranchBoundModel {
    fn default() -> Self {
        Self {
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }
}

impl BranchBoundModel {
    /// A node with no fittable children is a terminal allocation; the
    /// most expensive one seen so far wins, later ties replacing earlier.
    fn explore(
        &self,
        knapsack: &Knapsack,
        pool: &[MarketOrder],
        depth: usize,
        best: &mut Option<Knapsack>,
    ) {
        let mut is_leaf = true;

        if depth < self.depth_limit {
            for (id, order) in pool.iter().enumerate() {
                let mut child = knapsack.clone();
                if child.put(order).is_err() {
                    continue;
                }
                is_leaf = false;

                let mut rest = pool.to_vec();
                rest.remove(id);
                self.explore(&child, &rest, depth + 1, best);
            }
        }

        if is_leaf {
            debug!(depth, price = %knapsack.price(), "found leaf node");
            let price = knapsack.price();
            if best.as_ref().map(Knapsack::price).unwrap_or(Price(0)) <= price {
                *best = Some(knapsack.clone());
            }
        }
    }
}

impl OptimizationMethod for BranchBoundModel {
    fn optimize(&self, knapsack: &mut Knapsack, orders: &[MarketOrder]) -> OptimizeResult<()> {
        let mut best = None;
        self.explore(knapsack, orders, 0, &mut best);

        match best {
            Some(winner) => {
                *knapsack = winner;
                Ok(())
            }
            None => Err(OptimizeError::NoSolution),
        }
    }
}
