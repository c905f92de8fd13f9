//! The device manager: benchmark-driven allocation over free capacity.

use std::sync::Arc;

use tracing::trace;

use askgrid_core::{
    AskPlanResources, BenchmarkId, BenchmarkMapping, BenchmarkVector, DeviceClass,
    DeviceInventory, GpuUnit, NetFlags, SplittingAlgorithm,
};

use crate::error::{ResourceError, ResourceResult};

/// Minimum viable CPU slice, in core-percents.
const MIN_CPU_PERCENTS: u64 = 1;
/// Minimum viable RAM slice, bytes.
const MIN_RAM_BYTES: u64 = 4 << 20;
/// Minimum viable storage slice, bytes.
const MIN_STORAGE_BYTES: u64 = 64 << 20;

/// Stateful resource ledger. Tracks the still-free share of every benchmark
/// dimension and the still-unassigned GPU units.
///
/// `Clone` deep-copies the mutable free state (the full inventory and the
/// mapping are shared immutably), which is what lets branch-and-bound,
/// genetic crossover and batch racing explore allocations independently.
#[derive(Debug, Clone)]
pub struct DeviceManager {
    devices: Arc<DeviceInventory>,
    mapping: Arc<BenchmarkMapping>,
    free_benchmarks: BenchmarkVector,
    free_gpus: Vec<GpuUnit>,
    free_incoming: bool,
}

impl DeviceManager {
    /// Builds a manager from the worker's full inventory and the free subset
    /// of it (which may be the whole inventory, or a `limit_to` reduction).
    pub fn new(
        devices: Arc<DeviceInventory>,
        free_devices: &DeviceInventory,
        mapping: Arc<BenchmarkMapping>,
    ) -> Self {
        let free_benchmarks = free_devices.full_benchmarks(&mapping);
        Self {
            devices,
            mapping,
            free_benchmarks,
            free_gpus: free_devices.gpus.clone(),
            free_incoming: free_devices.network.net_flags.incoming,
        }
    }

    /// Free capacity left along every benchmark dimension.
    pub fn free_benchmarks(&self) -> &BenchmarkVector {
        &self.free_benchmarks
    }

    /// Whether the requirement would fit without committing anything.
    pub fn contains(&self, benchmarks: &BenchmarkVector, net_flags: &NetFlags) -> bool {
        self.clone().consume(benchmarks, net_flags).is_ok()
    }

    /// Carves the required benchmarks out of free capacity.
    ///
    /// On success the free state shrinks and the concrete per-device
    /// allocation is returned; on `Exhausted` the free state is untouched
    /// (atomic failure).
    pub fn consume(
        &mut self,
        benchmarks: &BenchmarkVector,
        net_flags: &NetFlags,
    ) -> ResourceResult<AskPlanResources> {
        let snapshot = (
            self.free_benchmarks.clone(),
            self.free_gpus.clone(),
            self.free_incoming,
        );

        match self.consume_inner(benchmarks, net_flags) {
            Ok(resources) => Ok(resources),
            Err(err) => {
                (self.free_benchmarks, self.free_gpus, self.free_incoming) = snapshot;
                Err(err)
            }
        }
    }

    fn consume_inner(
        &mut self,
        benchmarks: &BenchmarkVector,
        net_flags: &NetFlags,
    ) -> ResourceResult<AskPlanResources> {
        let cpu_share = self.consume_share(
            benchmarks,
            DeviceClass::Cpu,
            lower_bound(MIN_CPU_PERCENTS, self.devices.cpu.cores as u64 * 100),
            |devices, id| devices.cpu.benchmarks.get(&id).copied(),
        )?;
        let ram_share = self.consume_share(
            benchmarks,
            DeviceClass::Ram,
            lower_bound(MIN_RAM_BYTES, self.devices.ram.bytes),
            |devices, id| devices.ram.benchmarks.get(&id).copied(),
        )?;
        let gpu_hashes = self.consume_gpu(self.mapping.gpu_count(benchmarks), benchmarks)?;
        let storage_share = self.consume_share(
            benchmarks,
            DeviceClass::Storage,
            lower_bound(MIN_STORAGE_BYTES, self.devices.storage.bytes),
            |devices, id| devices.storage.benchmarks.get(&id).copied(),
        )?;
        let in_share = self.consume_share(benchmarks, DeviceClass::NetworkIn, 0.0, |devices, id| {
            devices.network.benchmarks_in.get(&id).copied()
        })?;
        let out_share =
            self.consume_share(benchmarks, DeviceClass::NetworkOut, 0.0, |devices, id| {
                devices.network.benchmarks_out.get(&id).copied()
            })?;

        if net_flags.incoming {
            if !self.free_incoming {
                return Err(ResourceError::Exhausted);
            }
            self.free_incoming = false;
        }

        Ok(AskPlanResources {
            cpu_core_percents: ceil_scale(cpu_share, self.devices.cpu.cores as u64 * 100),
            ram_bytes: ceil_scale(ram_share, self.devices.ram.bytes),
            storage_bytes: ceil_scale(storage_share, self.devices.storage.bytes),
            net_in_bps: ceil_scale(in_share, self.devices.network.in_bps),
            net_out_bps: ceil_scale(out_share, self.devices.network.out_bps),
            net_flags: *net_flags,
            gpu_hashes,
        })
    }

    /// Computes the fraction of one device class that must be allocated to
    /// satisfy the most demanding dimension, then subtracts that fraction
    /// from every participating free benchmark, rounding the consumed
    /// amounts up.
    fn consume_share(
        &mut self,
        required: &BenchmarkVector,
        class: DeviceClass,
        lower_bound: f64,
        device_benchmark: impl Fn(&DeviceInventory, BenchmarkId) -> Option<u64>,
    ) -> ResourceResult<f64> {
        let mapping = Arc::clone(&self.mapping);
        let devices = Arc::clone(&self.devices);
        let participating = move |id: BenchmarkId| -> Option<u64> {
            if mapping.device_class(id) != Some(class) {
                return None;
            }
            match mapping.splitting(id) {
                Some(SplittingAlgorithm::Proportional) => {
                    Some(device_benchmark(&devices, id).unwrap_or(0))
                }
                // Whole-unit and per-unit-minimum benchmarks participate
                // only when the device falls short of the requirement, so
                // the exhaustion check below rejects the order.
                Some(SplittingAlgorithm::None) | Some(SplittingAlgorithm::Min) => {
                    device_benchmark(&devices, id).filter(|&value| value < required.get(id))
                }
                None => None,
            }
        };

        let mut share = lower_bound;
        for (id, value) in required.iter() {
            if let Some(device_value) = participating(id) {
                if device_value == 0 {
                    if value == 0 {
                        continue;
                    }
                    return Err(ResourceError::Exhausted);
                }
                share = share.max(value as f64 / device_value as f64);
            }
        }

        for id in 0..self.free_benchmarks.len() {
            if let Some(device_value) = participating(id) {
                let need = ceil_scale(share, device_value);
                if self.free_benchmarks.get(id) < need {
                    return Err(ResourceError::Exhausted);
                }
            }
        }

        for id in 0..self.free_benchmarks.len() {
            if let Some(device_value) = participating(id) {
                let need = ceil_scale(share, device_value);
                self.free_benchmarks
                    .set(id, self.free_benchmarks.get(id) - need);
            }
        }

        Ok(share)
    }

    /// Whole-unit GPU allocation: exhaustive combination search over the
    /// free GPU set for the smallest-mismatch subset of at least `min_count`
    /// units. Ties are broken by the first combination found in free-GPU
    /// iteration order, which keeps the selection deterministic.
    fn consume_gpu(
        &mut self,
        min_count: u64,
        required: &BenchmarkVector,
    ) -> ResourceResult<Vec<String>> {
        let min_count = if min_count == 0 {
            if !self.gpu_required(required) {
                return Ok(Vec::new());
            }
            1
        } else {
            min_count
        } as usize;

        let gpu_ids: Vec<BenchmarkId> = (0..required.len())
            .filter(|&id| {
                self.mapping.device_class(id) == Some(DeviceClass::Gpu)
                    && Some(id) != self.mapping.gpu_count_id()
            })
            .collect();

        // Every selected unit must individually meet per-unit-minimum
        // benchmarks (e.g. GPU memory).
        let candidates: Vec<&GpuUnit> = self
            .free_gpus
            .iter()
            .filter(|gpu| {
                gpu_ids.iter().all(|&id| {
                    if self.mapping.splitting(id) != Some(SplittingAlgorithm::Min) {
                        return true;
                    }
                    match gpu.benchmarks.get(&id) {
                        Some(&value) => value >= required.get(id),
                        None => true,
                    }
                })
            })
            .collect();

        let proportional_ids: Vec<BenchmarkId> = gpu_ids
            .iter()
            .copied()
            .filter(|&id| self.mapping.splitting(id) == Some(SplittingAlgorithm::Proportional))
            .collect();

        let mut best_score = f64::MAX;
        let mut best: Option<Vec<usize>> = None;

        for k in min_count..=candidates.len() {
            for_each_combination(candidates.len(), k, &mut |subset| {
                let mut remaining: Vec<u64> =
                    proportional_ids.iter().map(|&id| required.get(id)).collect();
                let mut score = 0.0;
                let mut feasible = true;

                'subset: for &at in subset {
                    let gpu = candidates[at];
                    for (slot, &id) in proportional_ids.iter().enumerate() {
                        let value = gpu.benchmarks.get(&id).copied().unwrap_or(0);
                        if value == 0 {
                            if required.get(id) == 0 {
                                continue;
                            }
                            // This unit contributes nothing towards a
                            // nonzero requirement; the subset cannot win.
                            feasible = false;
                            break 'subset;
                        }

                        remaining[slot] = remaining[slot].saturating_sub(value);
                        let surplus = value.saturating_sub(required.get(id)) as f64;
                        score += (surplus / value as f64).powi(2);
                    }
                }

                if !feasible || remaining.iter().any(|&left| left != 0) {
                    return;
                }

                let score = score.sqrt();
                if score < best_score {
                    best_score = score;
                    best = Some(subset.to_vec());
                }
            });
        }

        let winners = best.ok_or(ResourceError::Exhausted)?;
        let hashes: Vec<String> = winners
            .iter()
            .map(|&at| candidates[at].hash.clone())
            .collect();

        trace!(count = hashes.len(), score = best_score, "selected GPU subset");

        self.free_gpus.retain(|gpu| !hashes.contains(&gpu.hash));
        Ok(hashes)
    }

    fn gpu_required(&self, required: &BenchmarkVector) -> bool {
        required.iter().any(|(id, value)| {
            value != 0 && self.mapping.device_class(id) == Some(DeviceClass::Gpu)
        })
    }
}

/// Lower-bound fraction of a device, guarding absent devices.
fn lower_bound(minimum: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        minimum as f64 / capacity as f64
    }
}

fn ceil_scale(share: f64, value: u64) -> u64 {
    (share * value as f64).ceil() as u64
}

/// Visits every k-combination of `0..n` in lexicographic order.
fn for_each_combination(n: usize, k: usize, visit: &mut impl FnMut(&[usize])) {
    if k == 0 || k > n {
        return;
    }

    let mut subset = vec![0usize; k];

    fn recurse(
        n: usize,
        subset: &mut Vec<usize>,
        depth: usize,
        next: usize,
        visit: &mut impl FnMut(&[usize]),
    ) {
        for at in next..n {
            subset[depth] = at;
            if depth + 1 == subset.len() {
                visit(subset);
            } else {
                recurse(n, subset, depth + 1, at + 1, visit);
            }
        }
    }

    recurse(n, &mut subset, 0, 0, visit);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use askgrid_core::benchmarks::BenchmarkDescriptor;
    use askgrid_core::{CpuDevice, GpuUnit, RamDevice};

    use super::*;

    // Slots: 0 CPU, 1 RAM, 2 GPU hashrate (proportional), 3 GPU count,
    // 4 GPU memory (per-unit minimum).
    fn mapping() -> Arc<BenchmarkMapping> {
        let mut descriptors = BTreeMap::new();
        let mut insert = |id: BenchmarkId, class, splitting| {
            descriptors.insert(id, BenchmarkDescriptor { class, splitting });
        };
        insert(0, DeviceClass::Cpu, SplittingAlgorithm::Proportional);
        insert(1, DeviceClass::Ram, SplittingAlgorithm::Proportional);
        insert(2, DeviceClass::Gpu, SplittingAlgorithm::Proportional);
        insert(3, DeviceClass::Gpu, SplittingAlgorithm::None);
        insert(4, DeviceClass::Gpu, SplittingAlgorithm::Min);
        Arc::new(BenchmarkMapping::new(descriptors, Some(3)))
    }

    fn gpu(hash: &str, hashrate: u64, memory: u64) -> GpuUnit {
        GpuUnit {
            hash: hash.into(),
            benchmarks: BTreeMap::from([(2, hashrate), (4, memory)]),
        }
    }

    fn inventory(gpus: Vec<GpuUnit>) -> Arc<DeviceInventory> {
        Arc::new(DeviceInventory {
            cpu: CpuDevice {
                cores: 2,
                benchmarks: BTreeMap::from([(0, 20_000)]),
            },
            ram: RamDevice {
                bytes: 1_000_000_000,
                benchmarks: BTreeMap::from([(1, 1_000_000_000)]),
            },
            gpus,
            ..Default::default()
        })
    }

    fn manager(gpus: Vec<GpuUnit>) -> DeviceManager {
        let devices = inventory(gpus);
        DeviceManager::new(devices.clone(), &devices, mapping())
    }

    fn require(cpu: u64, ram: u64) -> BenchmarkVector {
        BenchmarkVector::new(vec![cpu, ram, 0, 0, 0])
    }

    #[test]
    fn consume_produces_rounded_up_resources() {
        let mut manager = manager(vec![]);
        let resources = manager
            .consume(&require(5000, 700_000_000), &NetFlags::default())
            .unwrap();

        // 5000/20000 of two cores is half a core.
        assert_eq!(resources.cpu_core_percents, 50);
        assert_eq!(resources.ram_bytes, 700_000_000);
        assert!(resources.gpu_hashes.is_empty());
    }

    #[test]
    fn free_capacity_is_monotonically_non_increasing() {
        let mut manager = manager(vec![]);
        let mut previous = manager.free_benchmarks().clone();

        for _ in 0..3 {
            if manager
                .consume(&require(5000, 200_000_000), &NetFlags::default())
                .is_err()
            {
                break;
            }
            let current = manager.free_benchmarks().clone();
            for (id, value) in current.iter() {
                assert!(value <= previous.get(id));
            }
            previous = current;
        }
    }

    #[test]
    fn exhaustion_is_atomic() {
        let mut manager = manager(vec![]);
        let before = manager.free_benchmarks().clone();

        // RAM requirement exceeds the whole device.
        let err = manager
            .consume(&require(100, 2_000_000_000), &NetFlags::default())
            .unwrap_err();
        assert_eq!(err, ResourceError::Exhausted);
        assert_eq!(manager.free_benchmarks(), &before);
    }

    #[test]
    fn contains_does_not_mutate() {
        let manager = manager(vec![]);
        let before = manager.free_benchmarks().clone();
        assert!(manager.contains(&require(5000, 100), &NetFlags::default()));
        assert_eq!(manager.free_benchmarks(), &before);
    }

    #[test]
    fn gpu_pair_selection_is_optimal_and_deterministic() {
        let gpus = vec![
            gpu("gpu-0", 1000, 8),
            gpu("gpu-1", 1200, 8),
            gpu("gpu-2", 1400, 8),
            gpu("gpu-3", 1600, 8),
        ];

        // Two units totalling at least 2200 hashrate: (1000, 1200) fits
        // exactly with zero surplus.
        let required = BenchmarkVector::new(vec![0, 0, 2200, 2, 0]);

        for _ in 0..10 {
            let mut manager = manager(gpus.clone());
            let resources = manager.consume(&required, &NetFlags::default()).unwrap();
            assert_eq!(
                resources.gpu_hashes,
                vec!["gpu-0".to_string(), "gpu-1".to_string()]
            );
        }
    }

    #[test]
    fn gpu_memory_minimum_filters_units() {
        let gpus = vec![gpu("small", 4000, 4), gpu("big", 1000, 16)];
        // Requires 8 memory units per GPU; only "big" qualifies.
        let required = BenchmarkVector::new(vec![0, 0, 500, 1, 8]);

        let mut manager = manager(gpus);
        let resources = manager.consume(&required, &NetFlags::default()).unwrap();
        assert_eq!(resources.gpu_hashes, vec!["big".to_string()]);
    }

    #[test]
    fn gpu_exhaustion_when_no_combination_fits() {
        let gpus = vec![gpu("gpu-0", 1000, 8)];
        let required = BenchmarkVector::new(vec![0, 0, 100, 2, 0]); // Two units, one free.

        let mut manager = manager(gpus);
        assert_eq!(
            manager.consume(&required, &NetFlags::default()),
            Err(ResourceError::Exhausted)
        );
    }

    #[test]
    fn consumed_gpus_leave_the_free_set() {
        let gpus = vec![gpu("gpu-0", 1000, 8), gpu("gpu-1", 1200, 8)];
        let required = BenchmarkVector::new(vec![0, 0, 1000, 1, 0]);

        let mut manager = manager(gpus);
        manager.consume(&required, &NetFlags::default()).unwrap();
        // Both units can satisfy the second request only if the first one
        // actually left the free set.
        assert!(manager.consume(&required, &NetFlags::default()).is_ok());
        assert_eq!(
            manager.consume(&required, &NetFlags::default()),
            Err(ResourceError::Exhausted)
        );
    }

    #[test]
    fn incoming_network_is_a_whole_unit() {
        let devices = Arc::new(DeviceInventory {
            cpu: CpuDevice {
                cores: 2,
                benchmarks: BTreeMap::from([(0, 20_000)]),
            },
            ram: RamDevice {
                bytes: 1_000_000_000,
                benchmarks: BTreeMap::from([(1, 1_000_000_000)]),
            },
            network: askgrid_core::NetworkDevice {
                net_flags: NetFlags {
                    incoming: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });
        let mut manager = DeviceManager::new(devices.clone(), &devices, mapping());

        let incoming = NetFlags {
            incoming: true,
            ..Default::default()
        };
        assert!(manager.consume(&require(100, 100), &incoming).is_ok());
        assert_eq!(
            manager.consume(&require(100, 100), &incoming),
            Err(ResourceError::Exhausted)
        );
        // Orders not asking for incoming still fit.
        assert!(manager.consume(&require(100, 100), &NetFlags::default()).is_ok());
    }

    #[test]
    fn clone_isolates_exploration() {
        let mut manager = manager(vec![]);
        let mut probe = manager.clone();

        probe
            .consume(&require(10_000, 500_000_000), &NetFlags::default())
            .unwrap();
        assert_ne!(probe.free_benchmarks(), manager.free_benchmarks());

        // The original is unaffected and can still fit the whole device.
        assert!(
            manager
                .consume(&require(20_000, 1_000_000_000), &NetFlags::default())
                .is_ok()
        );
    }
}
