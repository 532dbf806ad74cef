//! Remote evaluation.
//!
//! A [`Cluster`] is a pool of worker threads bound to an [`Address`] in a
//! process-wide registry. A [`Client`] connects to it by connection string,
//! the same way it would reach a scheduler on another machine, and submits
//! task graphs. Submission returns a [`TaskFuture`] right away; the graph is
//! evaluated in the background on the cluster's workers.
//!
//! Both ends have an explicit lifecycle. Dropping a `Cluster` (or calling
//! [`Cluster::shutdown`]) unbinds its address: new connections and new
//! submissions fail, while evaluations already in flight run to completion.
//! Dropping a `Client` closes it.

mod address;
mod client;
mod future;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};

use serde::Deserialize;

use crate::error::ClusterError;

pub use address::{Address, DEFAULT_PORT};
pub use client::Client;
pub use future::{Status, TaskFuture};

static REGISTRY: LazyLock<Mutex<HashMap<Address, Weak<ClusterInner>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<Address, Weak<ClusterInner>>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Looks up a running cluster by address.
pub(crate) fn resolve(address: &Address) -> Option<Arc<ClusterInner>> {
    registry()
        .get(address)
        .and_then(Weak::upgrade)
        .filter(|cluster| cluster.is_open())
}

/// Settings of a worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Connection string clients use to reach the pool.
    pub address: String,
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
        }
    }
}

impl ClusterConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

pub(crate) struct ClusterInner {
    pub(crate) address: Address,
    pub(crate) pool: rayon::ThreadPool,
    workers: usize,
    open: AtomicBool,
    submissions: AtomicU64,
}

impl ClusterInner {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn next_submission(&self) -> u64 {
        self.submissions.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A running worker pool, reachable by its address until shut down.
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Builds the worker pool and binds it to `config.address`.
    pub fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        let address: Address = config.address.parse()?;
        let workers = config.workers.max(1);

        let mut registry = registry();

        if registry
            .get(&address)
            .and_then(Weak::upgrade)
            .is_some_and(|cluster| cluster.is_open())
        {
            return Err(ClusterError::AddressInUse(address.to_string()));
        }

        let port = address.port();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("kumiki-{port}-worker-{i}"))
            .build()?;

        let inner = Arc::new(ClusterInner {
            address: address.clone(),
            pool,
            workers,
            open: AtomicBool::new(true),
            submissions: AtomicU64::new(0),
        });

        registry.insert(address.clone(), Arc::downgrade(&inner));
        tracing::info!(%address, workers, "cluster started");

        Ok(Self { inner })
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Number of graphs submitted so far.
    pub fn submissions(&self) -> u64 {
        self.inner.submissions.load(Ordering::Relaxed)
    }

    /// Unbinds the address. Equivalent to dropping the cluster.
    pub fn shutdown(self) {}

    fn close(&self) {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut registry = registry();
        let bound_here = registry
            .get(&self.inner.address)
            .is_some_and(|weak| Weak::ptr_eq(weak, &Arc::downgrade(&self.inner)));

        if bound_here {
            registry.remove(&self.inner.address);
        }

        tracing::info!(address = %self.inner.address, "cluster shut down");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("address", &self.inner.address)
            .field("workers", &self.inner.workers)
            .field("open", &self.inner.is_open())
            .finish()
    }
}
