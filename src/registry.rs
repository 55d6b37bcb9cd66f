// Registry of running supervisors keyed by ID

use crate::error::{Result, WardenError};
use crate::health::{HealthStatus, HealthThresholds};
use crate::names::{HashIdSequence, SequenceGenerator};
use crate::process::{Supervisor, SupervisorStatus};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Minimum length of generated supervisor IDs
pub const ID_LENGTH: usize = 14;

struct Entry {
    supervisor: Arc<Supervisor>,
    thresholds: HealthThresholds,
}

/// Point-in-time view of one registered supervisor
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub id: String,
    pub command: String,
    pub status: SupervisorStatus,
    pub restarts: u64,
    pub restarts_per_minute: u64,
    pub errors: u64,
    pub health: HealthStatus,
}

/// Concurrent map of supervisor ID to supervisor
pub struct Registry {
    entries: DashMap<String, Entry>,
    ids: HashIdSequence,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ids: HashIdSequence::new(0, ID_LENGTH),
        }
    }

    /// Register `supervisor`, assigning an ID if it has none
    ///
    /// An explicit ID already in use is rejected and the registered
    /// supervisor is left in place. Generated IDs skip any taken ones.
    pub fn insert(&self, mut supervisor: Supervisor, thresholds: HealthThresholds) -> Result<Arc<Supervisor>> {
        let generated = supervisor.id().is_empty();
        loop {
            if generated {
                supervisor.set_id(self.ids.next_id());
            }

            match self.entries.entry(supervisor.id().to_string()) {
                MapEntry::Occupied(taken) if generated => {
                    debug!(supervisor = %taken.key(), "generated ID taken, retrying");
                }
                MapEntry::Occupied(taken) => {
                    return Err(WardenError::DuplicateId(taken.key().clone()));
                }
                MapEntry::Vacant(slot) => {
                    let supervisor = Arc::new(supervisor);
                    debug!(supervisor = %slot.key(), "registered: {}", supervisor);
                    slot.insert(Entry {
                        supervisor: Arc::clone(&supervisor),
                        thresholds,
                    });
                    return Ok(supervisor);
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.entries.get(id).map(|e| Arc::clone(&e.supervisor))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.entries.remove(id).map(|(_, e)| e.supervisor)
    }

    /// IDs in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate one supervisor against its thresholds
    pub fn health(&self, id: &str) -> Option<HealthReport> {
        self.entries.get(id).map(|e| report(e.key(), e.value()))
    }

    /// Health of every supervisor, sorted by ID
    pub fn health_all(&self) -> Vec<HealthReport> {
        let mut reports: Vec<HealthReport> = self
            .entries
            .iter()
            .map(|e| report(e.key(), e.value()))
            .collect();
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        reports
    }

    /// Stop every registered supervisor
    pub fn stop_all(&self) {
        for supervisor in self.snapshot() {
            supervisor.stop();
        }
    }

    /// Wait for every registered supervisor to finish
    pub async fn wait_all(&self) {
        for supervisor in self.snapshot() {
            supervisor.wait().await;
        }
    }

    // Clone out the Arcs so no map shard is held across an await
    fn snapshot(&self) -> Vec<Arc<Supervisor>> {
        self.entries
            .iter()
            .map(|e| Arc::clone(&e.supervisor))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn report(id: &str, entry: &Entry) -> HealthReport {
    let supervisor = &entry.supervisor;
    let restarts = supervisor.restarts();
    let rpm = supervisor.restarts_per_minute();
    HealthReport {
        id: id.to_string(),
        command: supervisor.to_string(),
        status: supervisor.status(),
        restarts,
        restarts_per_minute: rpm,
        errors: supervisor.errors(),
        health: entry.thresholds.evaluate(restarts, rpm),
    }
}
