//! Stub collaborators shared by the integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::watch;

use deployd::deploy::fsm::FsmSettings;
use deployd::deploy::orchestrator::{Clock, Orchestrator, OrchestratorOptions};
use deployd::errors::{DeploydError, PlatformError};
use deployd::http::platform::{PlatformClient, PlatformDeploymentId, StatusReport};
use deployd::models::deployment::{DeploymentRecord, PushEvent, Stage, Version};
use deployd::notify::dispatcher::Notifier;
use deployd::storage::counter::VersionAllocator;
use deployd::storage::records::{MemoryRecordStore, RecordStore};
use deployd::utils::CooldownOptions;
use platform_api::models::PlatformStatus;

// ================================ CLOCK ========================================= //

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// 2024-01-01 12:00 UTC
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ================================ PLATFORM ====================================== //

/// Scripted platform. Queued results are consumed first; afterwards triggers
/// and rollbacks succeed and polls report `default_status`.
pub struct FakePlatform {
    pub triggers: Mutex<Vec<(String, String, Version)>>,
    pub rollbacks: Mutex<Vec<(String, Version)>>,
    pub polls: Mutex<Vec<String>>,
    trigger_script: Mutex<VecDeque<Result<PlatformDeploymentId, PlatformError>>>,
    status_script: Mutex<VecDeque<Result<StatusReport, PlatformError>>>,
    rollback_script: Mutex<VecDeque<Result<PlatformDeploymentId, PlatformError>>>,
    default_status: Mutex<PlatformStatus>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            triggers: Mutex::new(Vec::new()),
            rollbacks: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
            trigger_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            rollback_script: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(PlatformStatus::Running),
        }
    }

    pub fn script_trigger(&self, result: Result<PlatformDeploymentId, PlatformError>) {
        self.trigger_script.lock().unwrap().push_back(result);
    }

    pub fn script_status(&self, status: PlatformStatus) {
        self.status_script.lock().unwrap().push_back(Ok(StatusReport {
            status,
            logs_url: None,
        }));
    }

    pub fn script_status_error(&self, error: PlatformError) {
        self.status_script.lock().unwrap().push_back(Err(error));
    }

    pub fn script_rollback(&self, result: Result<PlatformDeploymentId, PlatformError>) {
        self.rollback_script.lock().unwrap().push_back(result);
    }

    pub fn set_default_status(&self, status: PlatformStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn triggered_commits(&self) -> Vec<String> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, commit, _)| commit.clone())
            .collect()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn trigger(
        &self,
        application_id: &str,
        commit_hash: &str,
        version: &Version,
        _timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError> {
        let mut triggers = self.triggers.lock().unwrap();
        triggers.push((
            application_id.to_string(),
            commit_hash.to_string(),
            *version,
        ));
        match self.trigger_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(format!("dep-{}", triggers.len())),
        }
    }

    async fn get_status(
        &self,
        deployment_id: &str,
        _timeout: Duration,
    ) -> Result<StatusReport, PlatformError> {
        self.polls.lock().unwrap().push(deployment_id.to_string());
        match self.status_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(StatusReport {
                status: *self.default_status.lock().unwrap(),
                logs_url: None,
            }),
        }
    }

    async fn rollback(
        &self,
        application_id: &str,
        target_version: &Version,
        _timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError> {
        let mut rollbacks = self.rollbacks.lock().unwrap();
        rollbacks.push((application_id.to_string(), *target_version));
        match self.rollback_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(format!("rb-{}", rollbacks.len())),
        }
    }
}

// ================================ STORE ========================================= //

/// Memory store that can be made unavailable and that tracks, per
/// application, the most non-terminal records ever stored at once
pub struct TestStore {
    inner: MemoryRecordStore,
    pub fail_writes: AtomicBool,
    max_in_flight: Mutex<HashMap<String, usize>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            fail_writes: AtomicBool::new(false),
            max_in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn all(&self) -> Vec<DeploymentRecord> {
        self.inner.all()
    }

    pub fn max_in_flight(&self, application_id: &str) -> usize {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(application_id)
            .copied()
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), DeploydError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DeploydError::StorageError("disk unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for TestStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeploydError> {
        self.check_writable()?;
        self.inner.save(record).await?;

        let in_flight = self
            .inner
            .all()
            .iter()
            .filter(|r| r.application_id == record.application_id && !r.is_terminal())
            .count();
        let mut max = self.max_in_flight.lock().unwrap();
        let entry = max.entry(record.application_id.clone()).or_insert(0);
        *entry = (*entry).max(in_flight);
        Ok(())
    }

    async fn list(&self, application_id: &str) -> Result<Vec<DeploymentRecord>, DeploydError> {
        self.inner.list(application_id).await
    }

    async fn get(
        &self,
        application_id: &str,
        version: &Version,
    ) -> Result<Option<DeploymentRecord>, DeploydError> {
        self.inner.get(application_id, version).await
    }

    async fn list_in_flight(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        self.inner.list_in_flight().await
    }

    async fn list_unannounced(&self) -> Result<Vec<DeploymentRecord>, DeploydError> {
        self.inner.list_unannounced().await
    }

    async fn save_pending(
        &self,
        application_id: &str,
        event: Option<&PushEvent>,
    ) -> Result<(), DeploydError> {
        self.check_writable()?;
        self.inner.save_pending(application_id, event).await
    }

    async fn load_pending(&self) -> Result<Vec<(String, PushEvent)>, DeploydError> {
        self.inner.load_pending().await
    }
}

// ================================ NOTIFIER ====================================== //

pub struct CountingNotifier {
    pub notified: Mutex<Vec<DeploymentRecord>>,
    count: watch::Sender<usize>,
}

impl CountingNotifier {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            notified: Mutex::new(Vec::new()),
            count,
        }
    }

    /// Wait until at least `n` notifications were delivered
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    pub fn count(&self) -> usize {
        self.notified.lock().unwrap().len()
    }

    pub fn records(&self) -> Vec<DeploymentRecord> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, record: &DeploymentRecord) {
        let count = {
            let mut notified = self.notified.lock().unwrap();
            notified.push(record.clone());
            notified.len()
        };
        self.count.send_replace(count);
    }
}

// ================================ HARNESS ======================================= //

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub platform: Arc<FakePlatform>,
    pub store: Arc<TestStore>,
    pub notifier: Arc<CountingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(options())
    }

    pub fn with_options(options: OrchestratorOptions) -> Self {
        let platform = Arc::new(FakePlatform::new());
        let store = Arc::new(TestStore::new());
        let notifier = Arc::new(CountingNotifier::new());
        let clock = Arc::new(ManualClock::new());
        let orchestrator = Orchestrator::new(
            options,
            platform.clone(),
            store.clone(),
            Arc::new(VersionAllocator::in_memory()),
            notifier.clone(),
            clock.clone(),
        );
        Self {
            orchestrator,
            platform,
            store,
            notifier,
            clock,
        }
    }

    /// Records of `application_id`, oldest first
    pub fn records(&self, application_id: &str) -> Vec<DeploymentRecord> {
        self.store
            .all()
            .into_iter()
            .filter(|r| r.application_id == application_id)
            .collect()
    }

    /// Store a finished record directly, as an earlier run would have
    pub async fn seed(&self, application_id: &str, sequence: u32, stage: Stage) -> DeploymentRecord {
        let mut record = DeploymentRecord::new(
            application_id.to_string(),
            version(sequence),
            push(&format!("acme/{}", application_id), &format!("{:07x}", sequence)),
            3,
            1,
            self.clock.now(),
        );
        record.stage = stage;
        if stage.is_terminal() {
            record.finished_at = Some(self.clock.now());
        }
        self.store.save(&record).await.unwrap();
        record
    }
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        fsm: FsmSettings {
            retry_count: 3,
            retry_backoff: CooldownOptions::default(),
            call_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(600),
        },
        dedupe_window: Duration::from_secs(3600),
        applications: HashMap::new(),
    }
}

pub fn push(repository: &str, commit_hash: &str) -> PushEvent {
    PushEvent {
        repository: repository.to_string(),
        branch: "main".to_string(),
        commit_hash: commit_hash.to_string(),
        commit_message: format!("commit {}", commit_hash),
        author_name: "Dev".to_string(),
        received_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        commit_count: 1,
    }
}

/// `20240101.{sequence}`
pub fn version(sequence: u32) -> Version {
    Version::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), sequence)
}

/// A push payload as the Git host sends it
pub fn payload(git_ref: &str, after: &str, repository: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "ref": git_ref,
        "before": "0000000000000000000000000000000000000001",
        "after": after,
        "repository": { "full_name": repository, "private": true },
        "head_commit": {
            "id": after,
            "message": "Fix checkout flow",
            "author": { "name": "Dev", "email": "dev@example.com" }
        },
        "commits": [{ "id": after }],
        "pusher": { "name": "dev" }
    }))
    .unwrap()
}
