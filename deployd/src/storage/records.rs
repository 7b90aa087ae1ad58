//! Durable deployment record store

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::DeploydError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{DeploymentRecord, PushEvent, Stage, Version};
use crate::storage::layout::StorageLayout;

/// Record store trait for testability
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record keyed by `(application_id, version)`
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeploydError>;

    /// All records of an application, oldest version first
    async fn list(&self, application_id: &str) -> Result<Vec<DeploymentRecord>, DeploydError>;

    /// One record
    async fn get(
        &self,
        application_id: &str,
        version: &Version,
    ) -> Result<Option<DeploymentRecord>, DeploydError>;

    /// Records of every application that are not in a terminal stage
    async fn list_in_flight(&self) -> Result<Vec<DeploymentRecord>, DeploydError>;

    /// Terminal records whose outcome was never announced
    async fn list_unannounced(&self) -> Result<Vec<DeploymentRecord>, DeploydError>;

    /// Store (or clear, with `None`) the pending successor of an application
    async fn save_pending(
        &self,
        application_id: &str,
        event: Option<&PushEvent>,
    ) -> Result<(), DeploydError>;

    /// All pending successors
    async fn load_pending(&self) -> Result<Vec<(String, PushEvent)>, DeploydError>;
}

/// Most recent `Succeeded` version strictly older than `before`
pub fn last_succeeded(records: &[DeploymentRecord], before: &Version) -> Option<Version> {
    records
        .iter()
        .filter(|r| r.stage == Stage::Succeeded && r.version < *before)
        .map(|r| r.version)
        .max()
}

// ================================ FILE STORE ==================================== //

/// File-backed store: `records/{app}/{version}.json`, `pending/{app}.json`
pub struct FileRecordStore {
    records_dir: Dir,
    pending_dir: Dir,
}

impl FileRecordStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            records_dir: layout.records_dir(),
            pending_dir: layout.pending_dir(),
        }
    }

    fn app_dir(&self, application_id: &str) -> Dir {
        self.records_dir.subdir(&path_component(application_id))
    }

    async fn read_dir_records(&self, dir: &Dir) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let mut records = Vec::new();
        for path in dir.list_files("json").await? {
            let file = crate::filesys::file::File::new(path);
            match file.read_json::<DeploymentRecord>().await {
                Ok(record) => records.push(record),
                Err(DeploydError::JsonError(e)) => {
                    warn!("Skipping unreadable record {}: {}", file.path().display(), e);
                }
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(records)
    }

    /// Records of every application matching `keep`
    async fn list_where<F>(&self, keep: F) -> Result<Vec<DeploymentRecord>, DeploydError>
    where
        F: Fn(&DeploymentRecord) -> bool + Send + Sync,
    {
        let mut matching = Vec::new();
        for name in self.records_dir.list_dirs().await? {
            let dir = self.records_dir.subdir(&name);
            matching.extend(
                self.read_dir_records(&dir)
                    .await?
                    .into_iter()
                    .filter(|r| keep(r)),
            );
        }
        Ok(matching)
    }
}

/// Application IDs are used as path components; anything outside
/// `[A-Za-z0-9._-]` (or a bare `.`/`..`) is hex-encoded.
fn path_component(application_id: &str) -> String {
    let plain = !application_id.is_empty()
        && application_id != "."
        && application_id != ".."
        && application_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plain {
        application_id.to_string()
    } else {
        format!("_{}", hex::encode(application_id.as_bytes()))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeploydError> {
        self.app_dir(&record.application_id)
            .file(&format!("{}.json", record.version))
            .write_json(record)
            .await
    }

    async fn list(&self, application_id: &str) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let dir = self.app_dir(application_id);
        self.read_dir_records(&dir).await
    }

    async fn get(
        &self,
        application_id: &str,
        version: &Version,
    ) -> Result<Option<DeploymentRecord>, DeploydError> {
        self.app_dir(application_id)
            .file(&format!("{}.json", version))
            .read_json_opt()
            .await
    }

    async fn list_in_flight(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        self.list_where(|r| !r.is_terminal()).await
    }

    async fn list_unannounced(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        self.list_where(|r| r.is_terminal() && r.notification_pending)
            .await
    }

    async fn save_pending(
        &self,
        application_id: &str,
        event: Option<&PushEvent>,
    ) -> Result<(), DeploydError> {
        let file = self
            .pending_dir
            .file(&format!("{}.json", path_component(application_id)));
        match event {
            Some(event) => file.write_json(&PendingEntry {
                application_id: application_id.to_string(),
                event: event.clone(),
            })
            .await,
            None => file.delete().await,
        }
    }

    async fn load_pending(&self) -> Result<Vec<(String, PushEvent)>, DeploydError> {
        let mut pending = Vec::new();
        for path in self.pending_dir.list_files("json").await? {
            let entry: PendingEntry = crate::filesys::file::File::new(path).read_json().await?;
            pending.push((entry.application_id, entry.event));
        }
        Ok(pending)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PendingEntry {
    application_id: String,
    event: PushEvent,
}

// =============================== MEMORY STORE =================================== //

/// In-memory store, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<(String, Version), DeploymentRecord>>,
    pending: RwLock<HashMap<String, PushEvent>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, ordered by application then version
    pub fn all(&self) -> Vec<DeploymentRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeploydError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(
            (record.application_id.clone(), record.version),
            record.clone(),
        );
        Ok(())
    }

    async fn list(&self, application_id: &str) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| r.application_id == application_id)
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        application_id: &str,
        version: &Version,
    ) -> Result<Option<DeploymentRecord>, DeploydError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&(application_id.to_string(), *version))
            .cloned())
    }

    async fn list_in_flight(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_unannounced(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| r.is_terminal() && r.notification_pending)
            .cloned()
            .collect())
    }

    async fn save_pending(
        &self,
        application_id: &str,
        event: Option<&PushEvent>,
    ) -> Result<(), DeploydError> {
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        match event {
            Some(event) => {
                pending.insert(application_id.to_string(), event.clone());
            }
            None => {
                pending.remove(application_id);
            }
        }
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<(String, PushEvent)>, DeploydError> {
        let pending = self.pending.read().unwrap_or_else(|e| e.into_inner());
        Ok(pending
            .iter()
            .map(|(app, event)| (app.clone(), event.clone()))
            .collect())
    }
}
