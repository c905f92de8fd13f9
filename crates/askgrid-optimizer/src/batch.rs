//! Races several strategies over clones of one knapsack, keeps the best.

use std::thread;

use tracing::warn;

use askgrid_core::MarketOrder;

use crate::OptimizationMethod;
use crate::error::{OptimizeError, OptimizeResult};
use crate::knapsack::Knapsack;

pub struct BatchModel {
    methods: Vec<Box<dyn OptimizationMethod>>,
    /// Below this candidate count the brute method runs alone; the race
    /// is not worth its thread overhead on tiny pools.
    brute: Option<(usize, Box<dyn OptimizationMethod>)>,
}

impl BatchModel {
    pub fn new(
        methods: Vec<Box<dyn OptimizationMethod>>,
        brute: Option<(usize, Box<dyn OptimizationMethod>)>,
    ) -> Self {
        Self { methods, brute }
    }
}

impl OptimizationMethod for BatchModel {
    fn optimize(&self, knapsack: &mut Knapsack, orders: &[MarketOrder]) -> OptimizeResult<()> {
        if let Some((threshold, brute)) = &self.brute {
            if orders.len() < *threshold {
                return brute.optimize(knapsack, orders);
            }
        }

        if self.methods.is_empty() {
            return Err(OptimizeError::BatchFailed("no methods configured".into()));
        }

        // Each method works on a private clone; results merge only after
        // every thread has joined.
        let results: Vec<OptimizeResult<Knapsack>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .methods
                .iter()
                .map(|method| {
                    let mut clone = knapsack.clone();
                    scope.spawn(move || method.optimize(&mut clone, orders).map(|_| clone))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(OptimizeError::BatchFailed("sub-method panicked".into())))
                })
                .collect()
        });

        let mut winner: Option<Knapsack> = None;
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(candidate) => {
                    if winner.as_ref().is_none_or(|w| w.price() < candidate.price()) {
                        winner = Some(candidate);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "batch sub-method failed");
                    failures.push(err.to_string());
                }
            }
        }

        match winner {
            Some(winner) => {
                *knapsack = winner;
                Ok(())
            }
            None => Err(OptimizeError::BatchFailed(failures.join("; "))),
        }
    }
}
