//! Per-resource operation locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::errors::OrchestratorError;

/// Held for the duration of one operation on one resource
#[derive(Debug)]
pub struct ResourceGuard {
    resource_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

/// At most one provision, teardown or health cycle per resource at a time
#[derive(Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock without waiting
    pub fn try_acquire(&self, resource_id: &str) -> Result<ResourceGuard, OrchestratorError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(resource_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock
            .try_lock_owned()
            .map_err(|_| OrchestratorError::InFlight(resource_id.to_string()))?;
        Ok(ResourceGuard {
            resource_id: resource_id.to_string(),
            _guard: guard,
        })
    }

    pub fn is_locked(&self, resource_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(resource_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Drop the lock entry of a deleted resource, consuming its guard
    pub fn forget(&self, guard: ResourceGuard) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let id = guard.resource_id.clone();
        drop(guard);
        locks.remove(&id);
    }
}
