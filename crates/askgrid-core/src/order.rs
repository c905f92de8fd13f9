//! Market orders — open buy offers pulled from the marketplace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::benchmarks::BenchmarkVector;
use crate::price::Price;

/// Marketplace identity (an externally owned account address).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The unset/zero counterparty, matching anyone.
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric order identity assigned by the marketplace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// A buy offer.
    Bid,
    /// A sell offer.
    Ask,
}

/// Network reachability requirements/capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetFlags {
    pub overlay: bool,
    pub outbound: bool,
    pub incoming: bool,
}

impl NetFlags {
    /// Converse implication: every capability the `required` flags demand
    /// must be present on `self`.
    pub fn supports(&self, required: &NetFlags) -> bool {
        (self.overlay || !required.overlay)
            && (self.outbound || !required.outbound)
            && (self.incoming || !required.incoming)
    }
}

/// An open buy offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub id: OrderId,
    pub side: OrderSide,
    pub author: Address,
    /// Restricts who may sell to this order; `None` matches anyone.
    pub counterparty: Option<Address>,
    /// Price per second.
    pub price: Price,
    /// Zero means a spot order, open until cancelled.
    pub duration_secs: u64,
    pub benchmarks: BenchmarkVector,
    pub net_flags: NetFlags,
    /// Unix seconds when the order was placed.
    pub created_at: u64,
}

impl MarketOrder {
    pub fn is_spot(&self) -> bool {
        self.duration_secs == 0
    }

    /// Seconds the order has stayed open.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}
