//! Worker device inventory and free-capacity virtualization.
//!
//! The inventory is read once per optimization epoch from the worker. Free
//! capacity is derived from it by subtracting the resources of live ask
//! plans (`DeviceInventory::ask_plan_resources` + `AskPlanResources::sub`)
//! and scaling the inventory down to what remains (`limit_to`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::benchmarks::{BenchmarkId, BenchmarkMapping, BenchmarkVector, DeviceClass};
use crate::order::NetFlags;
use crate::plan::AskPlanResources;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuDevice {
    pub cores: u32,
    pub benchmarks: BTreeMap<BenchmarkId, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamDevice {
    pub bytes: u64,
    pub benchmarks: BTreeMap<BenchmarkId, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDevice {
    pub bytes: u64,
    pub benchmarks: BTreeMap<BenchmarkId, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    /// Inbound rate, bits per second.
    pub in_bps: u64,
    /// Outbound rate, bits per second.
    pub out_bps: u64,
    pub benchmarks_in: BTreeMap<BenchmarkId, u64>,
    pub benchmarks_out: BTreeMap<BenchmarkId, u64>,
    pub net_flags: NetFlags,
}

/// One whole GPU unit with a stable hash identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUnit {
    pub hash: String,
    pub benchmarks: BTreeMap<BenchmarkId, u64>,
}

/// A worker's physical device inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    pub cpu: CpuDevice,
    pub ram: RamDevice,
    pub storage: StorageDevice,
    pub network: NetworkDevice,
    pub gpus: Vec<GpuUnit>,
}

impl DeviceInventory {
    /// The inventory's aggregate benchmark vector, one slot per registered
    /// id. GPU slots sum across units; the designated GPU-count slot carries
    /// the number of units.
    pub fn full_benchmarks(&self, mapping: &BenchmarkMapping) -> BenchmarkVector {
        let mut values = vec![0u64; mapping.len()];

        for (id, value) in values.iter_mut().enumerate() {
            if mapping.gpu_count_id() == Some(id) {
                *value = self.gpus.len() as u64;
                continue;
            }

            *value = match mapping.device_class(id) {
                Some(DeviceClass::Cpu) => self.cpu.benchmarks.get(&id).copied().unwrap_or(0),
                Some(DeviceClass::Ram) => self.ram.benchmarks.get(&id).copied().unwrap_or(0),
                Some(DeviceClass::Storage) => {
                    self.storage.benchmarks.get(&id).copied().unwrap_or(0)
                }
                Some(DeviceClass::NetworkIn) => {
                    self.network.benchmarks_in.get(&id).copied().unwrap_or(0)
                }
                Some(DeviceClass::NetworkOut) => {
                    self.network.benchmarks_out.get(&id).copied().unwrap_or(0)
                }
                Some(DeviceClass::Gpu) => self
                    .gpus
                    .iter()
                    .map(|gpu| gpu.benchmarks.get(&id).copied().unwrap_or(0))
                    .sum(),
                None => 0,
            };
        }

        BenchmarkVector::new(values)
    }

    /// The full inventory expressed as ask-plan resources: everything free.
    pub fn ask_plan_resources(&self) -> AskPlanResources {
        AskPlanResources {
            cpu_core_percents: self.cpu.cores as u64 * 100,
            ram_bytes: self.ram.bytes,
            storage_bytes: self.storage.bytes,
            net_in_bps: self.network.in_bps,
            net_out_bps: self.network.out_bps,
            net_flags: self.network.net_flags,
            gpu_hashes: self.gpus.iter().map(|gpu| gpu.hash.clone()).collect(),
        }
    }

    /// Scales the inventory down to the given remaining resources: fractional
    /// devices shrink their benchmarks proportionally, GPUs are retained only
    /// if their hash is still free.
    pub fn limit_to(&self, free: &AskPlanResources) -> DeviceInventory {
        let cpu_full = self.cpu.cores as u64 * 100;

        DeviceInventory {
            cpu: CpuDevice {
                cores: self.cpu.cores,
                benchmarks: scale_benchmarks(
                    &self.cpu.benchmarks,
                    free.cpu_core_percents,
                    cpu_full,
                ),
            },
            ram: RamDevice {
                bytes: free.ram_bytes.min(self.ram.bytes),
                benchmarks: scale_benchmarks(&self.ram.benchmarks, free.ram_bytes, self.ram.bytes),
            },
            storage: StorageDevice {
                bytes: free.storage_bytes.min(self.storage.bytes),
                benchmarks: scale_benchmarks(
                    &self.storage.benchmarks,
                    free.storage_bytes,
                    self.storage.bytes,
                ),
            },
            network: NetworkDevice {
                in_bps: free.net_in_bps.min(self.network.in_bps),
                out_bps: free.net_out_bps.min(self.network.out_bps),
                benchmarks_in: scale_benchmarks(
                    &self.network.benchmarks_in,
                    free.net_in_bps,
                    self.network.in_bps,
                ),
                benchmarks_out: scale_benchmarks(
                    &self.network.benchmarks_out,
                    free.net_out_bps,
                    self.network.out_bps,
                ),
                net_flags: free.net_flags,
            },
            gpus: self
                .gpus
                .iter()
                .filter(|gpu| free.gpu_hashes.contains(&gpu.hash))
                .cloned()
                .collect(),
        }
    }
}

/// Scales every benchmark by `num/den`, rounding down. A zero denominator
/// means the device has no capacity at all, so everything scales to zero.
fn scale_benchmarks(
    benchmarks: &BTreeMap<BenchmarkId, u64>,
    num: u64,
    den: u64,
) -> BTreeMap<BenchmarkId, u64> {
    benchmarks
        .iter()
        .map(|(&id, &value)| {
            let scaled = if den == 0 {
                0
            } else {
                (value as u128 * num.min(den) as u128 / den as u128) as u64
            };
            (id, scaled)
        })
        .collect()
}
