//! Per-application version counters

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::DeploydError;
use crate::filesys::file::File;
use crate::models::deployment::Version;

/// Persisted counters, one entry per `{application_id}/{YYYYMMDD}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CounterState {
    #[serde(default)]
    counters: BTreeMap<String, u32>,
}

impl CounterState {
    fn key(application_id: &str, date: NaiveDate) -> String {
        format!("{}/{}", application_id, date.format("%Y%m%d"))
    }

    /// Highest version ever handed out for an application
    fn latest(&self, application_id: &str) -> Option<Version> {
        self.counters
            .iter()
            .filter_map(|(key, n)| {
                let (app, date) = key.rsplit_once('/')?;
                if app != application_id {
                    return None;
                }
                let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
                Some(Version::new(date, *n))
            })
            .max()
    }
}

/// Allocates `YYYYMMDD.N` versions.
///
/// Versions are strictly increasing per application: if the clock moves
/// backwards the allocator keeps counting on the latest date it has seen.
pub struct VersionAllocator {
    file: Option<File>,
    state: Mutex<CounterState>,
}

impl VersionAllocator {
    /// Allocator without persistence
    pub fn in_memory() -> Self {
        Self {
            file: None,
            state: Mutex::new(CounterState::default()),
        }
    }

    /// Allocator persisted to `file`, loading existing counters
    pub async fn open(file: File) -> Result<Self, DeploydError> {
        let state = file.read_json_opt::<CounterState>().await?.unwrap_or_default();
        Ok(Self {
            file: Some(file),
            state: Mutex::new(state),
        })
    }

    /// Allocate the next version of `application_id` for `today`
    pub async fn allocate(
        &self,
        application_id: &str,
        today: NaiveDate,
    ) -> Result<Version, DeploydError> {
        let mut state = self.state.lock().await;

        let date = match state.latest(application_id) {
            Some(latest) if latest.date() > today => latest.date(),
            _ => today,
        };
        let key = CounterState::key(application_id, date);
        let next = state.counters.get(&key).copied().unwrap_or(0) + 1;

        let mut updated = state.clone();
        updated.counters.insert(key, next);
        if let Some(file) = &self.file {
            file.write_json(&updated).await?;
        }
        *state = updated;

        let version = Version::new(date, next);
        debug!("Allocated version {} for {}", version, application_id);
        Ok(version)
    }

    /// Make sure future versions sort after `version` (used when counters
    /// were lost but records survived)
    pub async fn observe(&self, application_id: &str, version: Version) -> Result<(), DeploydError> {
        let mut state = self.state.lock().await;
        let key = CounterState::key(application_id, version.date());
        if state.counters.get(&key).copied().unwrap_or(0) >= version.sequence() {
            return Ok(());
        }

        let mut updated = state.clone();
        updated.counters.insert(key, version.sequence());
        if let Some(file) = &self.file {
            file.write_json(&updated).await?;
        }
        *state = updated;
        Ok(())
    }
}
