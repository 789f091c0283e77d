//! The publication gate.
//!
//! One lock guards the shared package repository for the whole orchestrator,
//! across every repository and architecture. Holding it is only possible
//! through a guard value, so every exit path releases it: normal return,
//! error, panic, or the holding future being dropped on cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Cloneable handle to the single publication lock.
#[derive(Clone)]
pub struct PublicationGate {
    name: Arc<str>,
    lock: Arc<Mutex<()>>,
}

impl PublicationGate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for exclusive access. Waiters are served first-come-first-served.
    pub async fn acquire(&self) -> PublicationGuard {
        let waiting = Instant::now();
        let guard = Arc::clone(&self.lock).lock_owned().await;
        debug!(
            lock = %self.name,
            waited_ms = waiting.elapsed().as_millis() as u64,
            "Publication lock acquired"
        );
        PublicationGuard {
            _guard: guard,
            name: Arc::clone(&self.name),
            acquired_at: Instant::now(),
        }
    }

    /// Run `action` while holding the lock.
    pub async fn with_lock<F, T>(&self, action: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        action.await
    }

    /// Whether someone currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Exclusive hold on the publication lock; released on drop.
pub struct PublicationGuard {
    _guard: OwnedMutexGuard<()>,
    name: Arc<str>,
    acquired_at: Instant,
}

impl Drop for PublicationGuard {
    fn drop(&mut self) {
        debug!(
            lock = %self.name,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Publication lock released"
        );
    }
}
