//! Evolutionary knapsack packing.
//!
//! Two genome encodings over the same candidate pool:
//!
//! - *packed*: a variable-length ordered subset of candidate orders;
//! - *decision*: a fixed-length vector of per-order inclusion
//!   probabilities, an order being included above 0.5.
//!
//! Fitness is the negated total price (minimization framing); a genome
//! whose packing produces no plans, or overflows the knapsack, scores 0.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use askgrid_core::MarketOrder;

use crate::OptimizationMethod;
use crate::error::{OptimizeError, OptimizeResult};
use crate::knapsack::Knapsack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenomeKind {
    Packed,
    Decision,
}

trait Genome: Clone {
    fn random(base: &Knapsack, orders: &Arc<Vec<MarketOrder>>, rng: &mut StdRng) -> Self;

    /// Negated packed price; 0 for an unfit individual.
    fn evaluate(&self) -> f64;

    fn mutate(&mut self, rng: &mut StdRng);

    fn crossover(&mut self, other: &mut Self, rng: &mut StdRng);

    /// Replays the genome's selection into the given knapsack.
    fn pack(&self, knapsack: &mut Knapsack) -> OptimizeResult<()>;
}

fn pack_fitness(base: &Knapsack, orders: impl Iterator<Item = usize>, pool: &[MarketOrder]) -> f64 {
    let mut knapsack = base.clone();
    for id in orders {
        if knapsack.put(&pool[id]).is_err() {
            return 0.0;
        }
    }

    if knapsack.plans().is_empty() {
        return 0.0;
    }

    -knapsack.price().as_usd_per_second()
}

#[derive(Clone)]
struct PackedGenome {
    base: Knapsack,
    orders: Arc<Vec<MarketOrder>>,
    candidates: Vec<usize>,
}

impl PackedGenome {
    fn is_fit(&self) -> bool {
        self.evaluate() < 0.0
    }
}

impl Genome for PackedGenome {
    fn random(base: &Knapsack, orders: &Arc<Vec<MarketOrder>>, rng: &mut StdRng) -> Self {
        let size = rng.gen_range(0..orders.len());
        let mut candidates: Vec<usize> = (0..orders.len()).collect();
        candidates.shuffle(rng);
        candidates.truncate(size);

        Self {
            base: base.clone(),
            orders: Arc::clone(orders),
            candidates,
        }
    }

    fn evaluate(&self) -> f64 {
        pack_fitness(&self.base, self.candidates.iter().copied(), &self.orders)
    }

    fn mutate(&mut self, rng: &mut StdRng) {
        // Unfit or empty genomes grow; fit ones drift in both directions.
        let add = self.candidates.is_empty() || !self.is_fit() || rng.gen_bool(0.5);
        if add {
            self.candidates.push(rng.gen_range(0..self.orders.len()));
        } else {
            let id = rng.gen_range(0..self.candidates.len());
            self.candidates.remove(id);
        }
    }

    fn crossover(&mut self, other: &mut Self, rng: &mut StdRng) {
        if self.candidates.is_empty() && other.candidates.is_empty() {
            return;
        }
        if self.candidates.is_empty() {
            let id = rng.gen_range(0..other.candidates.len());
            self.candidates.push(other.candidates[id]);
            return;
        }
        if other.candidates.is_empty() {
            let id = rng.gen_range(0..self.candidates.len());
            other.candidates.push(self.candidates[id]);
            return;
        }

        for _ in 0..10 {
            let i = rng.gen_range(0..self.candidates.len());
            let j = rng.gen_range(0..other.candidates.len());
            std::mem::swap(&mut self.candidates[i], &mut other.candidates[j]);
        }
    }

    fn pack(&self, knapsack: &mut Knapsack) -> OptimizeResult<()> {
        for &id in &self.candidates {
            if knapsack.put(&self.orders[id]).is_err() {
                return Err(OptimizeError::NoSolution);
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct DecisionGenome {
    base: Knapsack,
    orders: Arc<Vec<MarketOrder>>,
    decisions: Vec<f64>,
}

impl DecisionGenome {
    fn included(&self) -> impl Iterator<Item = usize> + '_ {
        self.decisions
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0.5)
            .map(|(id, _)| id)
    }

    fn flip(&mut self, rng: &mut StdRng) {
        let id = rng.gen_range(0..self.decisions.len());
        self.decisions[id] = if self.decisions[id] > 0.5 { 0.0 } else { 1.0 };
    }
}

impl Genome for DecisionGenome {
    fn random(base: &Knapsack, orders: &Arc<Vec<MarketOrder>>, _rng: &mut StdRng) -> Self {
        Self {
            base: base.clone(),
            orders: Arc::clone(orders),
            decisions: vec![0.0; orders.len()],
        }
    }

    fn evaluate(&self) -> f64 {
        pack_fitness(&self.base, self.included(), &self.orders)
    }

    fn mutate(&mut self, rng: &mut StdRng) {
        if rng.gen_bool(1.0 / 8.0) {
            self.flip(rng);
        }
        if rng.gen_bool(1.0 / 16.0) {
            self.flip(rng);
        }
    }

    fn crossover(&mut self, other: &mut Self, rng: &mut StdRng) {
        let len = self.decisions.len();
        if len < 2 {
            return;
        }

        // n-point segment exchange.
        let mut cuts: Vec<usize> = (1..len).collect();
        cuts.shuffle(rng);
        cuts.truncate((len / 10).max(1));
        cuts.sort_unstable();
        cuts.push(len);

        let mut swap = false;
        let mut start = 0;
        for cut in cuts {
            if swap {
                for id in start..cut {
                    std::mem::swap(&mut self.decisions[id], &mut other.decisions[id]);
                }
            }
            swap = !swap;
            start = cut;
        }
    }

    fn pack(&self, knapsack: &mut Knapsack) -> OptimizeResult<()> {
        for id in self.included().collect::<Vec<_>>() {
            if knapsack.put(&self.orders[id]).is_err() {
                return Err(OptimizeError::NoSolution);
            }
        }
        Ok(())
    }
}

pub struct GeneticModel {
    pub genome: GenomeKind,
    /// Individuals per generation.
    pub population_size: usize,
    pub max_generations: usize,
    /// Wall-clock cap on the whole evolution.
    pub max_age: Duration,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for GeneticModel {
    fn default() -> Self {
        Self {
            genome: GenomeKind::Decision,
            population_size: 256,
            max_generations: 128,
            max_age: Duration::from_secs(300),
            seed: None,
        }
    }
}

impl GeneticModel {
    fn evolve<G: Genome>(
        &self,
        knapsack: &mut Knapsack,
        orders: Arc<Vec<MarketOrder>>,
        rng: &mut StdRng,
    ) -> OptimizeResult<()> {
        let start = Instant::now();

        let mut population: Vec<G> = (0..self.population_size)
            .map(|_| G::random(knapsack, &orders, rng))
            .collect();

        let mut best: Option<(f64, G)> = None;
        let mut generation = 0;

        while generation < self.max_generations && start.elapsed() < self.max_age {
            let mut scored: Vec<(f64, G)> = population
                .drain(..)
                .map(|genome| (genome.evaluate(), genome))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((fitness, genome)) = scored.first() {
                if best.as_ref().is_none_or(|(b, _)| fitness < b) {
                    best = Some((*fitness, genome.clone()));
                }
            }

            // Elite half survives; offspring of random elites fill the rest.
            scored.truncate((self.population_size / 2).max(1));
            population = scored.into_iter().map(|(_, genome)| genome).collect();

            let elite = population.len();
            while population.len() < self.population_size {
                let mut left = population[rng.gen_range(0..elite)].clone();
                let mut right = population[rng.gen_range(0..elite)].clone();
                left.crossover(&mut right, rng);
                left.mutate(rng);
                right.mutate(rng);

                population.push(left);
                if population.len() < self.population_size {
                    population.push(right);
                }
            }

            generation += 1;
            if generation % (self.max_generations / 10).max(1) == 0 {
                debug!(
                    generation,
                    max_generations = self.max_generations,
                    best_price = -best.as_ref().map(|(f, _)| *f).unwrap_or_default(),
                    "optimization progress"
                );
            }
        }

        match best {
            Some((fitness, genome)) if fitness < 0.0 => genome.pack(knapsack),
            _ => Err(OptimizeError::Unevolved {
                generations: generation,
            }),
        }
    }
}

impl OptimizationMethod for GeneticModel {
    fn optimize(&self, knapsack: &mut Knapsack, orders: &[MarketOrder]) -> OptimizeResult<()> {
        if orders.is_empty() {
            return Err(OptimizeError::NotEnoughOrders {
                actual: 0,
                required: 1,
            });
        }

        let orders = Arc::new(orders.to_vec());
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        match self.genome {
            GenomeKind::Packed => self.evolve::<PackedGenome>(knapsack, orders, &mut rng),
            GenomeKind::Decision => self.evolve::<DecisionGenome>(knapsack, orders, &mut rng),
        }
    }
}
