//! Per-architecture worker pools.
//!
//! A pool admits at most one unit of work per worker. Each admitted unit
//! holds a lease naming the worker it runs on; dropping the lease frees it.

use crate::config::FleetConfig;
use cascade_core::repository::Architecture;
use cascade_core::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    architecture: Architecture,
    slots: Arc<Semaphore>,
    idle: Arc<Mutex<VecDeque<String>>>,
}

impl WorkerPool {
    pub fn new(architecture: Architecture, workers: Vec<String>) -> Self {
        Self {
            architecture,
            slots: Arc::new(Semaphore::new(workers.len())),
            idle: Arc::new(Mutex::new(workers.into())),
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free worker.
    pub async fn acquire(&self) -> Result<WorkerLease> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal(format!("worker pool {} closed", self.architecture)))?;

        let worker = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| {
                Error::Internal(format!("worker pool {} has a permit but no worker", self.architecture))
            })?;

        debug!(arch = %self.architecture, worker = %worker, "Worker leased");
        Ok(WorkerLease {
            worker,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }
}

/// Exclusive use of one worker.
#[derive(Debug)]
pub struct WorkerLease {
    worker: String,
    idle: Arc<Mutex<VecDeque<String>>>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerLease {
    pub fn worker(&self) -> &str {
        &self.worker
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        // Return the worker before the permit is released.
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(std::mem::take(&mut self.worker));
    }
}

/// All pools, keyed by architecture.
#[derive(Debug, Clone, Default)]
pub struct WorkerPools {
    pools: BTreeMap<Architecture, WorkerPool>,
}

impl WorkerPools {
    pub fn from_config(config: &FleetConfig) -> Self {
        let pools = config
            .architectures
            .iter()
            .map(|(arch, pool)| (*arch, WorkerPool::new(*arch, pool.workers.clone())))
            .collect();
        Self { pools }
    }

    pub fn insert(&mut self, pool: WorkerPool) {
        self.pools.insert(pool.architecture(), pool);
    }

    pub fn get(&self, architecture: Architecture) -> Result<&WorkerPool> {
        self.pools
            .get(&architecture)
            .ok_or_else(|| Error::Config(format!("no worker pool for {architecture}")))
    }
}
