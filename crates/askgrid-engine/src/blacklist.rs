//! Author blacklisting for incoming bids.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use askgrid_core::Address;

#[async_trait]
pub trait Blacklist: Send + Sync {
    /// Refreshes the deny set from wherever it is sourced.
    async fn update(&self) -> anyhow::Result<()>;

    fn is_allowed(&self, addr: &Address) -> bool;
}

/// Allows everyone. Used by prediction engines, which never trade.
pub struct EmptyBlacklist;

#[async_trait]
impl Blacklist for EmptyBlacklist {
    async fn update(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_allowed(&self, _addr: &Address) -> bool {
        true
    }
}

/// A fixed deny set loaded from configuration.
pub struct StaticBlacklist {
    denied: RwLock<HashSet<Address>>,
}

impl StaticBlacklist {
    pub fn new(denied: impl IntoIterator<Item = Address>) -> Self {
        Self {
            denied: RwLock::new(denied.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Blacklist for StaticBlacklist {
    async fn update(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_allowed(&self, addr: &Address) -> bool {
        !self
            .denied
            .read()
            .expect("blacklist lock poisoned")
            .contains(addr)
    }
}
