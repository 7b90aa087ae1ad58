//! Per-application serialization slot

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::deployment::{DeploymentRecord, PushEvent, Version};

/// The record currently holding an application's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDeployment {
    pub record_id: String,
    pub version: Version,
    pub commit_hash: String,
}

impl From<&DeploymentRecord> for ActiveDeployment {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            version: record.version,
            commit_hash: record.commit_hash().to_string(),
        }
    }
}

/// Why a commit counts as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    Active,
    Pending,

    /// Accepted earlier within the dedupe window, possibly finished since
    Recently,
}

/// State guarded by an application's lock.
///
/// At most one active record and at most one pending successor; a newer
/// push replaces the pending one.
#[derive(Debug, Default)]
pub struct AppSlot {
    pub active: Option<ActiveDeployment>,
    pub pending: Option<PushEvent>,
    recent: HashMap<String, DateTime<Utc>>,
}

impl AppSlot {
    /// Where `commit_hash` was already seen: the active or pending commit,
    /// or one accepted within `window`
    pub fn seen(&self, commit_hash: &str, now: DateTime<Utc>, window: Duration) -> Option<Seen> {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.commit_hash == commit_hash)
        {
            return Some(Seen::Active);
        }
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.commit_hash == commit_hash)
        {
            return Some(Seen::Pending);
        }
        self.recent
            .get(commit_hash)
            .filter(|seen| now - **seen < window)
            .map(|_| Seen::Recently)
    }

    /// Remember an accepted commit for duplicate detection
    pub fn remember(&mut self, commit_hash: &str, at: DateTime<Utc>) {
        self.recent.insert(commit_hash.to_string(), at);
    }

    /// Forget commits accepted longer than `window` ago; returns how many
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let before = self.recent.len();
        self.recent.retain(|_, seen| now - *seen < window);
        before - self.recent.len()
    }

    /// The pending successor `event` would become, with the commit count of
    /// any event it replaces folded in
    pub fn successor(&self, mut event: PushEvent) -> PushEvent {
        if let Some(replaced) = &self.pending {
            event.commit_count += replaced.commit_count;
        }
        event
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }
}
