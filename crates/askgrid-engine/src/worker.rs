//! The worker-management collaborator contract, plus the bulk-removal
//! helper that waits for plans to really disappear.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use askgrid_core::{AskPlan, DeviceInventory};

/// Everything the engine needs from a worker node.
#[async_trait]
pub trait WorkerManagement: Send + Sync {
    async fn devices(&self) -> anyhow::Result<DeviceInventory>;

    async fn ask_plans(&self) -> anyhow::Result<HashMap<String, AskPlan>>;

    /// Posts a new sell plan, returning its assigned id.
    async fn create_ask_plan(&self, plan: AskPlan) -> anyhow::Result<String>;

    async fn remove_ask_plan(&self, id: &str) -> anyhow::Result<()>;

    async fn next_maintenance(&self) -> anyhow::Result<u64>;
}

/// Per-id error aggregation for bulk operations. Renders as a JSON object
/// so a single log line carries every failure.
#[derive(Debug, Default)]
pub struct NamedErrorGroup {
    errs: BTreeMap<String, String>,
}

impl NamedErrorGroup {
    pub fn set(&mut self, id: impl Into<String>, err: impl fmt::Display) {
        self.errs.insert(id.into(), err.to_string());
    }

    /// Associates the error with every id that has none yet.
    pub fn set_unique(&mut self, ids: &[String], err: impl fmt::Display) {
        let err = err.to_string();
        for id in ids {
            self.errs.entry(id.clone()).or_insert_with(|| err.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errs.is_empty()
    }

    pub fn into_result(self) -> Result<(), NamedErrorGroup> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for NamedErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.errs) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.errs),
        }
    }
}

impl std::error::Error for NamedErrorGroup {}

/// Removes several ask plans and polls the live plan list until every id
/// is confirmed absent or the timeout fires.
///
/// Failures are collected per id; ids that were confirmed removed are not
/// tainted by the rest.
pub async fn remove_ask_plans(
    worker: &dyn WorkerManagement,
    ids: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), NamedErrorGroup> {
    let mut errs = NamedErrorGroup::default();

    let removals = join_all(
        ids.iter()
            .map(|id| async move { (id, worker.remove_ask_plan(id).await) }),
    )
    .await;
    for (id, result) in removals {
        if let Err(err) = result {
            errs.set(id.clone(), err);
        }
    }

    let id_set: HashSet<&String> = ids.iter().collect();
    let confirm = async {
        let mut timer = tokio::time::interval(poll_interval);
        loop {
            timer.tick().await;

            match worker.ask_plans().await {
                Ok(plans) => {
                    if !plans.keys().any(|id| id_set.contains(id)) {
                        return Ok(());
                    }
                    debug!("waiting for ask plans to be removed");
                }
                Err(err) => return Err(err),
            }
        }
    };

    match tokio::time::timeout(timeout, confirm).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => errs.set_unique(ids, err),
        Err(elapsed) => errs.set_unique(ids, elapsed),
    }

    errs.into_result()
}

/// A worker that exists only in memory: fixed devices, no live plans,
/// creations are recorded instead of applied. Backs supplier prediction.
#[derive(Debug)]
pub struct MockWorker {
    devices: DeviceInventory,
    plans: HashMap<String, AskPlan>,
    created: Mutex<Vec<AskPlan>>,
}

impl MockWorker {
    pub fn new(devices: DeviceInventory) -> Self {
        Self::with_plans(devices, HashMap::new())
    }

    /// A mock worker that already serves the given plans, for scenarios
    /// that exercise the replacement path.
    pub fn with_plans(devices: DeviceInventory, plans: HashMap<String, AskPlan>) -> Self {
        Self {
            devices,
            plans,
            created: Mutex::new(Vec::new()),
        }
    }

    /// The plans an engine run produced against this worker.
    pub fn created_plans(&self) -> Vec<AskPlan> {
        self.created.lock().expect("mock worker lock poisoned").clone()
    }
}

#[async_trait]
impl WorkerManagement for MockWorker {
    async fn devices(&self) -> anyhow::Result<DeviceInventory> {
        Ok(self.devices.clone())
    }

    async fn ask_plans(&self) -> anyhow::Result<HashMap<String, AskPlan>> {
        Ok(self.plans.clone())
    }

    async fn create_ask_plan(&self, plan: AskPlan) -> anyhow::Result<String> {
        let mut created = self.created.lock().expect("mock worker lock poisoned");
        created.push(plan);
        Ok(format!("mock-{}", created.len()))
    }

    async fn remove_ask_plan(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn next_maintenance(&self) -> anyhow::Result<u64> {
        Ok(u64::MAX)
    }
}

/// Wraps a real worker, allowing reads but swallowing every mutation.
/// Removals are tracked locally so the engine observes them as applied.
pub struct ReadOnlyWorker<W> {
    inner: W,
    removed: Mutex<HashSet<String>>,
    created: Mutex<Vec<AskPlan>>,
}

impl<W: WorkerManagement> ReadOnlyWorker<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            removed: Mutex::new(HashSet::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// The plans an engine run would have posted.
    pub fn created_plans(&self) -> Vec<AskPlan> {
        self.created
            .lock()
            .expect("read-only worker lock poisoned")
            .clone()
    }

    /// The plan ids an engine run would have torn down.
    pub fn removed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .removed
            .lock()
            .expect("read-only worker lock poisoned")
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl<W: WorkerManagement> WorkerManagement for ReadOnlyWorker<W> {
    async fn devices(&self) -> anyhow::Result<DeviceInventory> {
        self.inner.devices().await
    }

    async fn ask_plans(&self) -> anyhow::Result<HashMap<String, AskPlan>> {
        let mut plans = self.inner.ask_plans().await?;
        let removed = self.removed.lock().expect("read-only worker lock poisoned");
        plans.retain(|id, _| !removed.contains(id));
        Ok(plans)
    }

    async fn create_ask_plan(&self, plan: AskPlan) -> anyhow::Result<String> {
        self.created
            .lock()
            .expect("read-only worker lock poisoned")
            .push(plan);
        Ok("00000000-0000-0000-0000-000000000000".to_string())
    }

    async fn remove_ask_plan(&self, id: &str) -> anyhow::Result<()> {
        self.removed
            .lock()
            .expect("read-only worker lock poisoned")
            .insert(id.to_string());
        Ok(())
    }

    async fn next_maintenance(&self) -> anyhow::Result<u64> {
        self.inner.next_maintenance().await
    }
}
