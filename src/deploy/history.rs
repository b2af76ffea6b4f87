//! Append-only deployment history.
//!
//! ## Responsibility
//! Keep every [`DeploymentStatus`] in insertion (start-time) order and answer
//! the lookups the controller needs: the open entry for an environment and
//! the rollback target preceding a given entry.
//!
//! ## Guarantees
//! - Append-only: entries are never removed or reordered
//! - Frozen once closed: [`DeploymentHistory::update_open`] and
//!   [`DeploymentHistory::finalize`] refuse to touch an entry whose
//!   `end_time` is set
//!
//! ## NOT Responsible For
//! - Serializing access (the controller's lock does that)
//! - Durable storage

use chrono::{DateTime, Utc};

use super::types::{DeploymentPhase, DeploymentStatus, Environment};

/// Ordered log of deployment attempts.
#[derive(Debug, Clone, Default)]
pub struct DeploymentHistory {
    entries: Vec<DeploymentStatus>,
    next_id: u64,
}

impl DeploymentHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `status`, assigning it the next sequence id. Returns the id.
    pub fn append(&mut self, mut status: DeploymentStatus) -> u64 {
        self.next_id += 1;
        status.id = self.next_id;
        self.entries.push(status);
        self.next_id
    }

    /// Mutate an open entry in place. Returns `false` (and does nothing) if
    /// the entry does not exist or is already closed.
    pub fn update_open(&mut self, id: u64, f: impl FnOnce(&mut DeploymentStatus)) -> bool {
        match self.entries.iter_mut().find(|s| s.id == id) {
            Some(entry) if entry.is_open() => {
                f(entry);
                true
            }
            _ => false,
        }
    }

    /// Close an open entry with a terminal `phase`. Returns the frozen record,
    /// or `None` if the entry is missing or already closed, or if `phase` is
    /// not terminal.
    pub fn finalize(
        &mut self,
        id: u64,
        phase: DeploymentPhase,
        at: DateTime<Utc>,
    ) -> Option<DeploymentStatus> {
        let entry = self.entries.iter_mut().find(|s| s.id == id)?;
        if !entry.is_open() || !phase.is_terminal() {
            return None;
        }
        entry.phase = phase;
        entry.end_time = Some(at);
        Some(entry.clone())
    }

    /// The open entry for `environment`, if any.
    pub fn open_for(&self, environment: Environment) -> Option<&DeploymentStatus> {
        self.entries
            .iter()
            .rev()
            .find(|s| s.environment == environment && s.is_open())
    }

    /// Most recent non-canary entry strictly before `id` that traffic can
    /// safely return to: aborted attempts and deployments that were
    /// themselves rolled back are skipped.
    pub fn rollback_target(&self, id: u64) -> Option<&DeploymentStatus> {
        let position = self.entries.iter().position(|s| s.id == id)?;
        self.entries[..position].iter().rev().find(|s| {
            !s.is_canary()
                && !matches!(
                    s.phase,
                    DeploymentPhase::Aborted | DeploymentPhase::RolledBack
                )
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the entries in order.
    pub fn snapshot(&self) -> Vec<DeploymentStatus> {
        self.entries.clone()
    }
}
