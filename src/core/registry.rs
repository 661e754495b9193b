//! Registry of worker sessions held by in-flight runs.
//!
//! A session is registered by [`WorkerRegistry::acquire`] and removed when
//! the returned [`WorkerLease`] drops, whether the run finished, failed or
//! was cancelled by a timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Worker session already active: {name} (held by run {run_id})")]
    AlreadyActive { name: String, run_id: Uuid },
}

/// A registered worker session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSession {
    pub name: String,
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

type Sessions = Arc<Mutex<HashMap<String, WorkerSession>>>;

/// Active worker sessions, keyed by name
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    sessions: Sessions,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `run_id`; fails if the name is taken
    pub fn acquire(
        &self,
        name: impl Into<String>,
        run_id: Uuid,
    ) -> Result<WorkerLease, RegistryError> {
        let name = name.into();
        let mut sessions = lock(&self.sessions);

        if let Some(existing) = sessions.get(&name) {
            return Err(RegistryError::AlreadyActive {
                name,
                run_id: existing.run_id,
            });
        }

        sessions.insert(
            name.clone(),
            WorkerSession {
                name: name.clone(),
                run_id,
                acquired_at: Utc::now(),
            },
        );
        debug!(worker = %name, %run_id, "Worker session acquired");

        Ok(WorkerLease {
            name,
            sessions: Arc::clone(&self.sessions),
        })
    }

    pub fn is_active(&self, name: &str) -> bool {
        lock(&self.sessions).contains_key(name)
    }

    pub fn active(&self) -> Vec<WorkerSession> {
        let mut sessions: Vec<WorkerSession> = lock(&self.sessions).values().cloned().collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped ownership of a worker session
#[derive(Debug)]
pub struct WorkerLease {
    name: String,
    sessions: Sessions,
}

impl WorkerLease {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        lock(&self.sessions).remove(&self.name);
        debug!(worker = %self.name, "Worker session released");
    }
}

// A panic while holding the lock leaves the map itself consistent
fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<String, WorkerSession>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
