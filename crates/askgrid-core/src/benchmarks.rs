//! Benchmark vectors and the benchmark id registry.
//!
//! Every measured capability of a device (CPU single-thread throughput, GPU
//! hash rate, network bandwidth, ...) is assigned a stable numeric id by the
//! marketplace. The id → (device class, splitting algorithm) mapping is
//! loaded once at startup and stays immutable for the engine's lifetime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Stable numeric id of a registered benchmark.
pub type BenchmarkId = usize;

/// Hardware category a benchmark is grouped under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Cpu,
    Ram,
    Storage,
    NetworkIn,
    NetworkOut,
    Gpu,
}

/// How a device's benchmark capacity may be divided between allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplittingAlgorithm {
    /// The whole device must be allocated atomically.
    None,
    /// A fractional share of the device's benchmark may be allocated.
    Proportional,
    /// Per-unit minimum: every allocated unit must individually meet the
    /// requirement (e.g. GPU memory).
    Min,
}

/// A fixed-length ordered sequence of benchmark scores, one slot per
/// registered benchmark id. Missing slots read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkVector(pub Vec<u64>);

impl BenchmarkVector {
    pub fn new(values: Vec<u64>) -> Self {
        Self(values)
    }

    pub fn get(&self, id: BenchmarkId) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, id: BenchmarkId, value: u64) {
        if id >= self.0.len() {
            self.0.resize(id + 1, 0);
        }
        self.0[id] = value;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BenchmarkId, u64)> + '_ {
        self.0.iter().copied().enumerate()
    }
}

impl From<Vec<u64>> for BenchmarkVector {
    fn from(values: Vec<u64>) -> Self {
        Self(values)
    }
}

/// One entry of the benchmark registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDescriptor {
    pub class: DeviceClass,
    pub splitting: SplittingAlgorithm,
}

/// The immutable id → descriptor mapping loaded at startup.
///
/// `gpu_count_id` names the benchmark slot that carries the number of GPU
/// units an order requires; the device manager reads the requested count
/// from there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMapping {
    descriptors: BTreeMap<BenchmarkId, BenchmarkDescriptor>,
    gpu_count_id: Option<BenchmarkId>,
}

impl BenchmarkMapping {
    pub fn new(
        descriptors: BTreeMap<BenchmarkId, BenchmarkDescriptor>,
        gpu_count_id: Option<BenchmarkId>,
    ) -> Self {
        Self {
            descriptors,
            gpu_count_id,
        }
    }

    pub fn device_class(&self, id: BenchmarkId) -> Option<DeviceClass> {
        self.descriptors.get(&id).map(|d| d.class)
    }

    pub fn splitting(&self, id: BenchmarkId) -> Option<SplittingAlgorithm> {
        self.descriptors.get(&id).map(|d| d.splitting)
    }

    /// Number of registered benchmark slots (highest id + 1).
    pub fn len(&self) -> usize {
        self.descriptors
            .keys()
            .next_back()
            .map(|id| id + 1)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn gpu_count_id(&self) -> Option<BenchmarkId> {
        self.gpu_count_id
    }

    /// The number of GPU units an order requires, read from the vector.
    pub fn gpu_count(&self, benchmarks: &BenchmarkVector) -> u64 {
        self.gpu_count_id.map(|id| benchmarks.get(id)).unwrap_or(0)
    }
}
