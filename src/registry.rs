//! Worker registry: role id to capability descriptor and implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use phasegate_common::Worker;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::errors::RegistryError;

/// What a worker role can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub role: String,
    /// Accepted task types; empty accepts every type.
    pub task_types: Vec<String>,
    /// Maximum tasks of this role in flight at once.
    pub concurrency: usize,
    /// Deadline that overrides the phase deadline, if set.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl WorkerDescriptor {
    pub fn new(role: impl Into<String>, task_types: &[&str], concurrency: usize) -> Self {
        Self {
            role: role.into(),
            task_types: task_types.iter().map(|t| t.to_string()).collect(),
            concurrency,
            timeout_secs: None,
        }
    }

    pub fn accepts(&self, task_type: &str) -> bool {
        self.task_types.is_empty() || self.task_types.iter().any(|t| t == task_type)
    }
}

pub struct WorkerEntry {
    pub descriptor: WorkerDescriptor,
    pub worker: Arc<dyn Worker>,
    permits: Arc<Semaphore>,
}

impl WorkerEntry {
    /// Semaphore bounding concurrent tasks for this role.
    pub fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}

#[derive(Default)]
pub struct WorkerRegistry {
    entries: BTreeMap<String, WorkerEntry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: WorkerDescriptor, worker: Arc<dyn Worker>) -> Result<(), RegistryError> {
        if self.entries.contains_key(&descriptor.role) {
            return Err(RegistryError::DuplicateRole(descriptor.role));
        }
        debug!(role = %descriptor.role, concurrency = descriptor.concurrency, "worker registered");
        let permits = Arc::new(Semaphore::new(descriptor.concurrency.max(1)));
        self.entries.insert(
            descriptor.role.clone(),
            WorkerEntry {
                descriptor,
                worker,
                permits,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, role: &str) -> Option<&WorkerEntry> {
        self.entries.get(role)
    }

    /// Find the worker for `role` and check that it accepts `task_type`.
    pub fn resolve(&self, role: &str, task_type: &str) -> Result<&WorkerEntry, RegistryError> {
        let entry = self
            .entries
            .get(role)
            .ok_or_else(|| RegistryError::UnknownRole(role.to_string()))?;
        if !entry.descriptor.accepts(task_type) {
            return Err(RegistryError::TaskTypeNotAccepted {
                role: role.to_string(),
                task_type: task_type.to_string(),
            });
        }
        Ok(entry)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WorkerDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
