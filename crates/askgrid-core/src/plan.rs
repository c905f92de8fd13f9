//! Ask plans — posted sell offers carved out of a worker's inventory.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::order::{NetFlags, OrderId};
use crate::price::Price;

/// Per-device resource allocation backing one ask plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskPlanResources {
    /// Hundredths of a CPU core (100 == one full core).
    pub cpu_core_percents: u64,
    pub ram_bytes: u64,
    pub storage_bytes: u64,
    /// Inbound network throughput, bits per second.
    pub net_in_bps: u64,
    /// Outbound network throughput, bits per second.
    pub net_out_bps: u64,
    pub net_flags: NetFlags,
    /// Stable hashes of the whole GPU units assigned to this plan.
    pub gpu_hashes: Vec<String>,
}

impl AskPlanResources {
    /// Checked component-wise subtraction. Used to virtualize free devices
    /// by removing live plans from the full inventory; fails atomically
    /// against `self` being left partially mutated.
    pub fn sub(&mut self, other: &AskPlanResources) -> Result<(), CoreError> {
        let mut next = self.clone();

        next.cpu_core_percents = sub_field(
            "cpu",
            self.cpu_core_percents,
            other.cpu_core_percents,
        )?;
        next.ram_bytes = sub_field("ram", self.ram_bytes, other.ram_bytes)?;
        next.storage_bytes = sub_field("storage", self.storage_bytes, other.storage_bytes)?;
        next.net_in_bps = sub_field("network-in", self.net_in_bps, other.net_in_bps)?;
        next.net_out_bps = sub_field("network-out", self.net_out_bps, other.net_out_bps)?;

        for hash in &other.gpu_hashes {
            let at = next
                .gpu_hashes
                .iter()
                .position(|h| h == hash)
                .ok_or_else(|| CoreError::UnknownGpu(hash.clone()))?;
            next.gpu_hashes.remove(at);
        }

        if other.net_flags.incoming {
            if !next.net_flags.incoming {
                return Err(CoreError::IncomingNotAllocated);
            }
            next.net_flags.incoming = false;
        }

        *self = next;
        Ok(())
    }
}

fn sub_field(device: &'static str, lhs: u64, rhs: u64) -> Result<u64, CoreError> {
    lhs.checked_sub(rhs).ok_or(CoreError::Underflow {
        device,
        requested: rhs,
        available: lhs,
    })
}

/// A worker's posted sell offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskPlan {
    pub id: String,
    /// The marketplace order this plan is bound to, once posted.
    pub order_id: Option<OrderId>,
    /// Set once a buyer takes the plan; deal-bound plans are never victims.
    pub deal_id: Option<u64>,
    /// Price per second.
    pub price: Price,
    /// Zero means a spot plan, cancellable at will.
    pub duration_secs: u64,
    pub resources: AskPlanResources,
    /// Unix seconds when the plan was posted.
    pub created_at: u64,
}

impl AskPlan {
    pub fn is_spot(&self) -> bool {
        self.duration_secs == 0
    }

    /// Seconds the plan has stayed on the market without a deal.
    pub fn unsold_duration(&self, now: u64) -> u64 {
        if self.deal_id.is_some() {
            0
        } else {
            now.saturating_sub(self.created_at)
        }
    }

    /// Whether two plans offer the same thing: identical resources, price
    /// and duration. Identity and binding are deliberately ignored.
    pub fn same_shape(&self, other: &AskPlan) -> bool {
        self.price == other.price
            && self.duration_secs == other.duration_secs
            && self.resources == other.resources
    }
}

/// Total per-second price of a plan set.
pub fn sum_price<'a>(plans: impl IntoIterator<Item = &'a AskPlan>) -> Price {
    plans.into_iter().map(|plan| plan.price).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(cpu: u64, ram: u64) -> AskPlanResources {
        AskPlanResources {
            cpu_core_percents: cpu,
            ram_bytes: ram,
            ..Default::default()
        }
    }

    #[test]
    fn sub_is_checked() {
        let mut full = resources(200, 1024);
        full.sub(&resources(50, 512)).unwrap();
        assert_eq!(full.cpu_core_percents, 150);
        assert_eq!(full.ram_bytes, 512);

        let err = full.sub(&resources(500, 0)).unwrap_err();
        assert!(matches!(err, CoreError::Underflow { device: "cpu", .. }));
    }

    #[test]
    fn sub_failure_leaves_self_untouched() {
        let mut full = resources(200, 1024);
        let bad = resources(100, 4096); // RAM underflows after CPU succeeds.
        assert!(full.sub(&bad).is_err());
        assert_eq!(full, resources(200, 1024));
    }

    #[test]
    fn sub_removes_gpus_by_hash() {
        let mut full = AskPlanResources {
            gpu_hashes: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        let taken = AskPlanResources {
            gpu_hashes: vec!["b".into()],
            ..Default::default()
        };
        full.sub(&taken).unwrap();
        assert_eq!(full.gpu_hashes, vec!["a".to_string(), "c".to_string()]);

        assert!(matches!(
            full.sub(&taken).unwrap_err(),
            CoreError::UnknownGpu(_)
        ));
    }

    #[test]
    fn sub_releases_incoming_flag_once() {
        let mut full = AskPlanResources {
            net_flags: NetFlags {
                incoming: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let taken = AskPlanResources {
            net_flags: NetFlags {
                incoming: true,
                ..Default::default()
            },
            ..Default::default()
        };
        full.sub(&taken).unwrap();
        assert!(!full.net_flags.incoming);
        assert!(matches!(
            full.sub(&taken).unwrap_err(),
            CoreError::IncomingNotAllocated
        ));
    }

    #[test]
    fn same_shape_ignores_identity() {
        let plan = AskPlan {
            id: "plan-1".into(),
            order_id: Some(OrderId(7)),
            deal_id: None,
            price: Price(100),
            duration_secs: 0,
            resources: resources(50, 512),
            created_at: 0,
        };
        let mut other = plan.clone();
        other.id = "plan-2".into();
        other.order_id = None;
        assert!(plan.same_shape(&other));

        other.price = Price(101);
        assert!(!plan.same_shape(&other));
    }
}
