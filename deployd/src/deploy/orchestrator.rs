//! Deployment orchestrator
//!
//! Owns every [`DeploymentRecord`] from creation to its terminal stage. One
//! record per application runs at a time; each runs on its own task and
//! waits on timers, never on a blocked thread.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use platform_api::models::PlatformStatus;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{FsmSettings, StageEvent};
use crate::deploy::monitor::{Monitor, Tick};
use crate::deploy::queue::{ActiveDeployment, AppSlot, Seen};
use crate::errors::{DeploydError, PlatformError};
use crate::http::platform::PlatformClient;
use crate::models::deployment::{DeploymentRecord, PushEvent, Stage, Version};
use crate::notify::dispatcher::Notifier;
use crate::storage::counter::VersionAllocator;
use crate::storage::records::{last_succeeded, RecordStore};
use crate::utils::calc_exp_backoff;

/// Reason recorded for deployments found mid-trigger after a restart
pub const INTERRUPTED: &str = "interrupted before the platform accepted the deployment";

/// Reason recorded when a rollback has nothing to go back to
pub const NO_STABLE_VERSION: &str = "no previous stable version";

/// Wall clock used for timestamps and version dates
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub fsm: FsmSettings,

    /// A commit accepted again within this window is a duplicate delivery
    pub dedupe_window: Duration,

    /// Repository full name to platform application ID
    pub applications: HashMap<String, String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            fsm: FsmSettings::default(),
            dedupe_window: Duration::from_secs(3600),
            applications: HashMap::new(),
        }
    }
}

/// What happened to a submitted push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new record was created and is running
    Started {
        application_id: String,
        record_id: String,
        version: Version,
    },

    /// Queued behind the running deployment
    Queued { application_id: String },

    /// Queued, replacing an older queued push
    Superseded {
        application_id: String,
        replaced_commit: String,
    },

    /// Same commit already accepted; nothing to do
    Duplicate { application_id: String },
}

impl Admission {
    pub fn application_id(&self) -> &str {
        match self {
            Admission::Started { application_id, .. }
            | Admission::Queued { application_id }
            | Admission::Superseded { application_id, .. }
            | Admission::Duplicate { application_id } => application_id,
        }
    }
}

#[derive(Debug)]
enum Entry {
    /// New record, starts at validation
    Fresh,

    /// Record found in flight after a restart
    Resume,

    /// Record found in flight that can no longer run
    Abort(String),
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    dedupe_window: chrono::Duration,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn RecordStore>,
    versions: Arc<VersionAllocator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<AppSlot>>>>,
    outcomes: broadcast::Sender<DeploymentRecord>,
}

impl Orchestrator {
    pub fn new(
        options: OrchestratorOptions,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn RecordStore>,
        versions: Arc<VersionAllocator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (outcomes, _) = broadcast::channel(64);
        let window_secs = i64::try_from(options.dedupe_window.as_secs()).unwrap_or(i64::MAX);
        let dedupe_window = chrono::Duration::seconds(window_secs.min(i64::MAX / 1000));
        Arc::new(Self {
            options,
            dedupe_window,
            platform,
            store,
            versions,
            notifier,
            clock,
            slots: Mutex::new(HashMap::new()),
            outcomes,
        })
    }

    /// Records reaching a terminal stage, in the order they finish
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentRecord> {
        self.outcomes.subscribe()
    }

    /// Platform application ID for a repository: the configured mapping, or
    /// the repository's short name
    pub fn resolve_application(&self, repository: &str) -> String {
        match self.options.applications.get(repository) {
            Some(application_id) => application_id.clone(),
            None => repository
                .rsplit('/')
                .next()
                .unwrap_or(repository)
                .to_string(),
        }
    }

    fn slot(&self, application_id: &str) -> Arc<AsyncMutex<AppSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(application_id.to_string())
            .or_default()
            .clone()
    }

    /// Accept a push: start it, queue it behind the running deployment, or
    /// acknowledge it as a duplicate.
    ///
    /// Fails only when the record store cannot take the event.
    pub async fn submit(self: &Arc<Self>, event: PushEvent) -> Result<Admission, DeploydError> {
        let application_id = self.resolve_application(&event.repository);
        let now = self.clock.now();

        let slot = self.slot(&application_id);
        let mut guard = slot.lock().await;

        if let Some(seen) = guard.seen(&event.commit_hash, now, self.dedupe_window) {
            self.log_duplicate(&application_id, &event.commit_hash, seen)
                .await;
            return Ok(Admission::Duplicate { application_id });
        }

        if guard.is_busy() {
            let commit_hash = event.commit_hash.clone();
            let replaced = guard.pending.as_ref().map(|p| p.commit_hash.clone());
            let successor = guard.successor(event);
            self.store
                .save_pending(&application_id, Some(&successor))
                .await?;
            guard.pending = Some(successor);
            guard.remember(&commit_hash, now);

            return Ok(match replaced {
                Some(replaced_commit) => {
                    info!(
                        "Queued {} for {}, superseding {}",
                        commit_hash, application_id, replaced_commit
                    );
                    Admission::Superseded {
                        application_id,
                        replaced_commit,
                    }
                }
                None => {
                    info!(
                        "Queued {} for {} behind the running deployment",
                        commit_hash, application_id
                    );
                    Admission::Queued { application_id }
                }
            });
        }

        // A pending event left over from a failed start is folded into this one
        let stale = guard.pending.is_some();
        let event = guard.successor(event);
        let record = self.start_locked(&application_id, &mut guard, event).await?;
        if stale {
            guard.pending = None;
            self.clear_pending(&application_id).await;
        }

        Ok(Admission::Started {
            application_id,
            record_id: record.id,
            version: record.version,
        })
    }

    async fn log_duplicate(&self, application_id: &str, commit_hash: &str, seen: Seen) {
        let finished = match seen {
            Seen::Recently => self.store.list(application_id).await.ok().and_then(|records| {
                records
                    .into_iter()
                    .rev()
                    .find(|r| r.commit_hash() == commit_hash && r.is_terminal())
            }),
            Seen::Active | Seen::Pending => None,
        };

        match finished {
            Some(record) => info!(
                "Duplicate delivery of {} for {}: deployment {} already ended {}, push a new commit to deploy again",
                commit_hash, application_id, record.version, record.stage
            ),
            None => info!(
                "Duplicate delivery of {} for {} ({:?}), acknowledging",
                commit_hash, application_id, seen
            ),
        }
    }

    /// Create and spawn a record; the caller holds the application's slot
    async fn start_locked(
        self: &Arc<Self>,
        application_id: &str,
        slot: &mut AppSlot,
        event: PushEvent,
    ) -> Result<DeploymentRecord, DeploydError> {
        let now = self.clock.now();

        let history = self.store.list(application_id).await?;
        if let Some(latest) = history.last() {
            self.versions.observe(application_id, latest.version).await?;
        }
        let commits = commits_since_last_success(&history) + event.commit_count;

        let version = self
            .versions
            .allocate(application_id, now.date_naive())
            .await?;
        let commit_hash = event.commit_hash.clone();
        let record = DeploymentRecord::new(
            application_id.to_string(),
            version,
            event,
            self.options.fsm.retry_count,
            commits,
            now,
        );
        self.store.save(&record).await?;

        slot.active = Some(ActiveDeployment::from(&record));
        slot.remember(&commit_hash, now);
        info!(
            "Deployment {} of {} created for commit {}",
            version, application_id, commit_hash
        );

        self.spawn_drive(record.clone(), Entry::Fresh);
        Ok(record)
    }

    fn spawn_drive(self: &Arc<Self>, record: DeploymentRecord, entry: Entry) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(record, entry).await;
        });
    }

    async fn drive(self: Arc<Self>, mut record: DeploymentRecord, entry: Entry) {
        match entry {
            Entry::Fresh => self.run(&mut record).await,
            Entry::Resume => self.resume(&mut record).await,
            Entry::Abort(reason) => {
                self.transition(&mut record, StageEvent::Fail(reason)).await;
            }
        }

        if !record.is_terminal() {
            error!(
                "Deployment {} of {} stopped in stage {}",
                record.version, record.application_id, record.stage
            );
            let reason = format!("stopped unexpectedly in stage {}", record.stage);
            self.transition(&mut record, StageEvent::Fail(reason)).await;
        }

        self.finish(record).await;
    }

    /// Apply an event and persist the record. Reaching a terminal stage also
    /// marks the outcome as owed a notification.
    async fn transition(&self, record: &mut DeploymentRecord, event: StageEvent) -> bool {
        let from = record.stage;
        if let Err(e) = record.process(event, self.clock.now()) {
            error!(
                "Deployment {} of {}: {}",
                record.version, record.application_id, e
            );
            return false;
        }

        if record.stage != from {
            if record.is_terminal() {
                record.notification_pending = true;
            }
            match &record.last_error {
                Some(err) if record.stage == Stage::Failed || record.stage == Stage::RollingBack => {
                    warn!(
                        "Deployment {} of {}: {} -> {} ({})",
                        record.version, record.application_id, from, record.stage, err
                    );
                }
                _ => {
                    info!(
                        "Deployment {} of {}: {} -> {}",
                        record.version, record.application_id, from, record.stage
                    );
                }
            }
        }

        self.persist(record).await;
        true
    }

    /// Save a record. A terminal record is retried until the store takes it,
    /// so the slot is never released over an in-flight record on disk.
    async fn persist(&self, record: &DeploymentRecord) {
        let mut attempt = 0;
        loop {
            let delay = match self.store.save(record).await {
                Ok(()) => return,
                Err(e) if !record.is_terminal() => {
                    error!(
                        "Failed to persist deployment {} of {}: {}",
                        record.version, record.application_id, e
                    );
                    return;
                }
                Err(e) => {
                    let delay = calc_exp_backoff(&self.options.fsm.retry_backoff, attempt);
                    error!(
                        "Failed to persist final stage of deployment {} of {}: {}, retrying in {:?}",
                        record.version, record.application_id, e, delay
                    );
                    delay
                }
            };
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    async fn run(&self, record: &mut DeploymentRecord) {
        self.transition(record, StageEvent::Validate).await;
        if let Err(reason) = self.preflight(record).await {
            self.transition(record, StageEvent::Fail(reason)).await;
            return;
        }

        self.transition(record, StageEvent::Trigger).await;
        let application_id = record.application_id.clone();
        let commit_hash = record.commit_hash().to_string();
        let version = record.version;
        let (app, commit, version) = (application_id.as_str(), commit_hash.as_str(), &version);
        let platform = &self.platform;

        let triggered = self
            .call_with_retry(record, "trigger", move |timeout| {
                platform.trigger(app, commit, version, timeout)
            })
            .await;
        let platform_deployment_id = match triggered {
            Ok(id) => id,
            Err(reason) => {
                self.transition(record, StageEvent::Fail(reason)).await;
                return;
            }
        };

        self.transition(
            record,
            StageEvent::Accepted {
                platform_deployment_id,
            },
        )
        .await;
        self.transition(
            record,
            StageEvent::Monitor {
                retry_budget: self.options.fsm.retry_count,
            },
        )
        .await;

        let monitor = Monitor::start(
            self.options.fsm.monitor_interval,
            self.options.fsm.monitor_timeout,
        );
        self.monitor(record, monitor).await;
    }

    /// Checks before anything reaches the platform
    async fn preflight(&self, record: &DeploymentRecord) -> Result<(), String> {
        if !is_valid_application_id(&record.application_id) {
            return Err(format!("invalid application id '{}'", record.application_id));
        }
        if !is_valid_commit_hash(record.commit_hash()) {
            return Err(format!("invalid commit hash '{}'", record.commit_hash()));
        }

        let records = self
            .store
            .list(&record.application_id)
            .await
            .map_err(|e| format!("record store unavailable: {}", e))?;
        // The slot is authoritative; a stored record it does not hold is a
        // leftover that no task drives any more
        for other in records
            .iter()
            .filter(|r| r.id != record.id && !r.is_terminal())
        {
            let holds_slot = self
                .slot(&record.application_id)
                .lock()
                .await
                .active
                .as_ref()
                .is_some_and(|active| active.record_id == other.id);
            if holds_slot {
                return Err(format!(
                    "deployment {} of {} is still in flight",
                    other.version, other.application_id
                ));
            }
            warn!(
                "Deployment {} of {} is stored as {} but no longer runs, ignoring",
                other.version, other.application_id, other.stage
            );
        }
        Ok(())
    }

    /// Call the platform, retrying transient errors with backoff while the
    /// record has attempts left
    async fn call_with_retry<T, F, Fut>(
        &self,
        record: &mut DeploymentRecord,
        operation: &str,
        mut call: F,
    ) -> Result<T, String>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let settings = &self.options.fsm;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(settings.call_timeout, call(settings.call_timeout))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Transient(format!(
                    "{} timed out after {}s",
                    operation,
                    settings.call_timeout.as_secs()
                ))),
            };

            let message = match result {
                Ok(value) => return Ok(value),
                Err(PlatformError::Permanent(message)) => {
                    return Err(format!("{} rejected: {}", operation, message));
                }
                Err(PlatformError::Transient(message)) => message,
            };

            self.transition(record, StageEvent::Retry(message.clone()))
                .await;
            if !record.can_retry() {
                return Err(format!(
                    "{} failed after {} attempts: {}",
                    operation, settings.retry_count, message
                ));
            }

            let delay = calc_exp_backoff(&settings.retry_backoff, attempt);
            attempt += 1;
            warn!(
                "{} of {} {} failed ({}), retrying in {:?}",
                operation, record.application_id, record.version, message, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn monitor(&self, record: &mut DeploymentRecord, mut monitor: Monitor) {
        let settings = &self.options.fsm;
        let Some(deployment_id) = record.platform_deployment_id.clone() else {
            let reason = "no platform deployment to monitor".to_string();
            self.transition(record, StageEvent::Fail(reason)).await;
            return;
        };

        loop {
            if monitor.tick().await == Tick::TimedOut {
                let reason = format!(
                    "monitoring timed out after {}s",
                    settings.monitor_timeout.as_secs()
                );
                self.roll_back(record, reason).await;
                return;
            }

            let polled = tokio::time::timeout(
                settings.call_timeout,
                self.platform.get_status(&deployment_id, settings.call_timeout),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PlatformError::Transient(format!(
                    "status poll timed out after {}s",
                    settings.call_timeout.as_secs()
                )))
            });

            match polled {
                Ok(report) => {
                    let logs_changed = report.logs_url.is_some() && report.logs_url != record.logs_url;
                    match report.status {
                        PlatformStatus::Success => {
                            self.transition(
                                record,
                                StageEvent::Succeeded {
                                    logs_url: report.logs_url,
                                },
                            )
                            .await;
                            return;
                        }
                        PlatformStatus::Failure => {
                            if logs_changed {
                                self.observe(record, report.logs_url).await;
                            }
                            self.roll_back(record, "platform reported failure".to_string())
                                .await;
                            return;
                        }
                        PlatformStatus::Pending | PlatformStatus::Running => {
                            debug!(
                                "Deployment {} of {} is {:?}, {:?} left",
                                record.version,
                                record.application_id,
                                report.status,
                                monitor.remaining()
                            );
                            if logs_changed || record.attempts_remaining != settings.retry_count {
                                self.observe(record, report.logs_url).await;
                            }
                        }
                    }
                }
                Err(PlatformError::Transient(message)) => {
                    self.transition(record, StageEvent::Retry(message.clone()))
                        .await;
                    if !record.can_retry() {
                        let reason = format!(
                            "status polling failed after {} attempts: {}",
                            settings.retry_count, message
                        );
                        self.transition(record, StageEvent::Fail(reason)).await;
                        return;
                    }
                    warn!(
                        "Status poll for {} of {} failed: {}",
                        record.version, record.application_id, message
                    );
                }
                Err(PlatformError::Permanent(message)) => {
                    let reason = format!("status polling rejected: {}", message);
                    self.transition(record, StageEvent::Fail(reason)).await;
                    return;
                }
            }
        }
    }

    async fn observe(&self, record: &mut DeploymentRecord, logs_url: Option<String>) {
        self.transition(
            record,
            StageEvent::Observed {
                logs_url,
                retry_budget: self.options.fsm.retry_count,
            },
        )
        .await;
    }

    /// Redeploy the most recent prior `Succeeded` version
    async fn roll_back(&self, record: &mut DeploymentRecord, reason: String) {
        let lookup = self
            .store
            .list(&record.application_id)
            .await
            .map(|records| last_succeeded(&records, &record.version));

        let target = lookup.as_ref().ok().copied().flatten();
        self.transition(
            record,
            StageEvent::RollBack {
                reason,
                target,
                retry_budget: self.options.fsm.retry_count,
            },
        )
        .await;

        let target = match lookup {
            Ok(Some(target)) => target,
            Ok(None) => {
                self.transition(record, StageEvent::Fail(NO_STABLE_VERSION.to_string()))
                    .await;
                return;
            }
            Err(e) => {
                let reason = format!("rollback target lookup failed: {}", e);
                self.transition(record, StageEvent::Fail(reason)).await;
                return;
            }
        };

        info!(
            "Rolling back {} from {} to {}",
            record.application_id, record.version, target
        );
        let application_id = record.application_id.clone();
        let (app, target_ref) = (application_id.as_str(), &target);
        let platform = &self.platform;
        let rolled_back = self
            .call_with_retry(record, "rollback", move |timeout| {
                platform.rollback(app, target_ref, timeout)
            })
            .await;

        match rolled_back {
            Ok(platform_deployment_id) => {
                debug!(
                    "Rollback of {} accepted as {}",
                    application_id, platform_deployment_id
                );
                self.transition(record, StageEvent::RolledBack).await;
            }
            Err(e) => {
                let reason = format!("rollback to {} failed: {}", target, e);
                self.transition(record, StageEvent::Fail(reason)).await;
            }
        }
    }

    /// Re-enter monitoring after a restart, querying the platform first
    async fn resume(&self, record: &mut DeploymentRecord) {
        if record.platform_deployment_id.is_none() {
            self.transition(record, StageEvent::Fail(INTERRUPTED.to_string()))
                .await;
            return;
        }

        let settings = &self.options.fsm;
        let entered = record
            .history
            .iter()
            .rev()
            .find(|t| t.stage == Stage::Monitoring)
            .map(|t| t.at);
        let remaining = match entered {
            Some(at) => (self.clock.now() - at)
                .to_std()
                .map(|elapsed| settings.monitor_timeout.saturating_sub(elapsed))
                .unwrap_or(settings.monitor_timeout),
            None => settings.monitor_timeout,
        };

        info!(
            "Resuming deployment {} of {} ({:?} of monitoring left)",
            record.version, record.application_id, remaining
        );
        self.transition(
            record,
            StageEvent::Resume {
                retry_budget: settings.retry_count,
            },
        )
        .await;
        self.monitor(record, Monitor::resume(settings.monitor_interval, remaining))
            .await;
    }

    /// Notify, release the slot, then start the pending successor if any
    async fn finish(self: &Arc<Self>, record: DeploymentRecord) {
        info!(
            "Deployment {} of {} finished: {}",
            record.version, record.application_id, record.stage
        );

        if record.notification_pending {
            self.spawn_announce(record.clone());
        }

        let application_id = record.application_id.clone();
        let slot = self.slot(&application_id);
        {
            let mut guard = slot.lock().await;
            if guard
                .active
                .as_ref()
                .is_some_and(|active| active.record_id == record.id)
            {
                guard.active = None;
            }

            if !guard.is_busy() {
                if let Some(next) = guard.pending.take() {
                    match self.start_locked(&application_id, &mut guard, next.clone()).await {
                        Ok(_) => self.clear_pending(&application_id).await,
                        Err(e) => {
                            error!(
                                "Failed to start queued deployment of {} for {}: {}",
                                next.commit_hash, application_id, e
                            );
                            guard.pending = Some(next);
                        }
                    }
                }
            }
        }

        // Nobody listening is fine
        let _ = self.outcomes.send(record);
    }

    /// Notify in the background, then clear the record's pending flag
    fn spawn_announce(self: &Arc<Self>, mut record: DeploymentRecord) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.notifier.notify(&record).await;
            record.notification_pending = false;
            if let Err(e) = this.store.save(&record).await {
                warn!(
                    "Failed to mark deployment {} of {} as announced: {}",
                    record.version, record.application_id, e
                );
            }
        });
    }

    async fn clear_pending(&self, application_id: &str) {
        if let Err(e) = self.store.save_pending(application_id, None).await {
            warn!("Failed to clear pending event of {}: {}", application_id, e);
        }
    }

    /// Resume in-flight records and queued events after a restart, and
    /// announce finished records whose notification never went out.
    ///
    /// Returns the number of records that went back to monitoring; records
    /// the platform never accepted are failed instead.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, DeploydError> {
        for record in self.store.list_unannounced().await? {
            info!(
                "Announcing deployment {} of {} ({}) left unannounced",
                record.version, record.application_id, record.stage
            );
            self.spawn_announce(record);
        }

        let mut in_flight = self.store.list_in_flight().await?;
        // Newest first, so only the latest record of an application resumes
        in_flight.sort_by(|a, b| {
            a.application_id
                .cmp(&b.application_id)
                .then(b.version.cmp(&a.version))
        });

        let mut resumed = 0;
        for record in in_flight {
            self.versions
                .observe(&record.application_id, record.version)
                .await?;

            let slot = self.slot(&record.application_id);
            let mut guard = slot.lock().await;
            let entry = if guard.is_busy() {
                Entry::Abort("superseded by a newer in-flight deployment".to_string())
            } else {
                guard.active = Some(ActiveDeployment::from(&record));
                guard.remember(record.commit_hash(), record.source_commit.received_at);
                if record.platform_deployment_id.is_some() {
                    resumed += 1;
                }
                Entry::Resume
            };
            debug!(
                "Recovering deployment {} of {} ({:?})",
                record.version, record.application_id, entry
            );
            self.spawn_drive(record, entry);
        }

        for (application_id, event) in self.store.load_pending().await? {
            let slot = self.slot(&application_id);
            let mut guard = slot.lock().await;
            if guard.is_busy() {
                info!(
                    "Restored queued commit {} for {}",
                    event.commit_hash, application_id
                );
                guard.pending = Some(event);
                continue;
            }

            match self.start_locked(&application_id, &mut guard, event).await {
                Ok(_) => self.clear_pending(&application_id).await,
                Err(e) => error!(
                    "Failed to start restored deployment for {}: {}",
                    application_id, e
                ),
            }
        }

        if resumed > 0 {
            info!("Resumed {} in-flight deployment(s)", resumed);
        }
        Ok(resumed)
    }

    /// Drop dedupe entries older than the window; returns how many
    pub async fn prune_dedupe(&self) -> usize {
        let slots: Vec<_> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };

        let now = self.clock.now();
        let mut pruned = 0;
        for slot in slots {
            pruned += slot.lock().await.prune(now, self.dedupe_window);
        }
        pruned
    }

    /// Records of an application, newest first
    pub async fn records(&self, application_id: &str) -> Result<Vec<DeploymentRecord>, DeploydError> {
        let mut records = self.store.list(application_id).await?;
        records.reverse();
        Ok(records)
    }

    pub async fn record(
        &self,
        application_id: &str,
        version: &Version,
    ) -> Result<Option<DeploymentRecord>, DeploydError> {
        self.store.get(application_id, version).await
    }
}

/// Commits of every record since the newest `Succeeded` one
fn commits_since_last_success(records: &[DeploymentRecord]) -> u32 {
    records
        .iter()
        .rev()
        .take_while(|r| r.stage != Stage::Succeeded)
        .map(|r| r.source_commit.commit_count)
        .sum()
}

fn is_valid_application_id(application_id: &str) -> bool {
    !application_id.is_empty()
        && application_id.len() <= 128
        && application_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_valid_commit_hash(commit_hash: &str) -> bool {
    (1..=64).contains(&commit_hash.len()) && commit_hash.chars().all(|c| c.is_ascii_hexdigit())
}
