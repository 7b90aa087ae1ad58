//! Orchestrator integration tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::Duration;

use deployd::deploy::orchestrator::{Admission, Clock, INTERRUPTED, NO_STABLE_VERSION};
use deployd::errors::PlatformError;
use deployd::models::deployment::{Stage, StageTransition};
use deployd::notify::dispatcher::render_summary;
use deployd::storage::records::RecordStore;
use platform_api::models::PlatformStatus;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use crate::support::{options, push, version, Harness};

fn count_stage(stages: &[Stage], stage: Stage) -> usize {
    stages.iter().filter(|s| **s == stage).count()
}

#[tokio::test(start_paused = true)]
async fn test_push_to_main_succeeds_after_two_polls() {
    let h = Harness::new();
    h.platform.script_status(PlatformStatus::Running);
    h.platform.script_status(PlatformStatus::Success);
    let mut outcomes = h.orchestrator.subscribe();

    let admission = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    match admission {
        Admission::Started {
            application_id,
            version: v,
            ..
        } => {
            assert_eq!(application_id, "web");
            assert_eq!(v.to_string(), "20240101.1");
        }
        other => panic!("unexpected admission: {:?}", other),
    }

    let finished = outcomes.recv().await.unwrap();
    assert_eq!(finished.stage, Stage::Succeeded);
    assert_eq!(finished.version, version(1));
    assert_eq!(h.platform.poll_count(), 2);
    assert_eq!(
        finished.stages(),
        vec![
            Stage::Received,
            Stage::Validating,
            Stage::Triggering,
            Stage::Deploying,
            Stage::Monitoring,
            Stage::Succeeded,
        ]
    );
    assert!(finished.rolled_back_from_version.is_none());
    assert!(finished.finished_at.is_some());

    h.notifier.wait_for(1).await;
    let notified = h.notifier.records();
    assert_eq!(notified.len(), 1);
    let summary = render_summary(&notified[0]);
    assert!(summary.contains("web"));
    assert!(summary.contains("20240101.1"));
    assert!(summary.contains("succeeded"));

    // Persisted in its terminal stage
    let stored = h.records("web");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].stage, Stage::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_transient_trigger_errors_exhaust_retries() {
    let h = Harness::new();
    for _ in 0..3 {
        h.platform
            .script_trigger(Err(PlatformError::Transient("503 Service Unavailable".to_string())));
    }

    let started = Instant::now();
    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    // Backoff of 2s then 4s between the three attempts
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(h.platform.triggers.lock().unwrap().len(), 3);
    assert!(h.platform.rollbacks.lock().unwrap().is_empty());

    let record = &h.records("web")[0];
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.attempts_remaining, 0);
    let error = record.last_error.as_deref().unwrap();
    assert!(error.contains("trigger failed after 3 attempts"));
    assert!(error.contains("503"));
    assert_eq!(
        record.stages(),
        vec![
            Stage::Received,
            Stage::Validating,
            Stage::Triggering,
            Stage::Failed
        ]
    );
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_trigger_error_is_not_retried() {
    let h = Harness::new();
    h.platform
        .script_trigger(Err(PlatformError::Permanent("unknown application".to_string())));

    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    assert_eq!(h.platform.triggers.lock().unwrap().len(), 1);
    let record = &h.records("web")[0];
    assert_eq!(record.stage, Stage::Failed);
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .contains("unknown application"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_commit_fails_validation() {
    let h = Harness::new();

    assert_ok!(h.orchestrator.submit(push("acme/web", "not-a-sha!")).await);
    h.notifier.wait_for(1).await;

    assert!(h.platform.triggers.lock().unwrap().is_empty());
    let record = &h.records("web")[0];
    assert_eq!(
        record.stages(),
        vec![Stage::Received, Stage::Validating, Stage::Failed]
    );
    assert!(record.last_error.as_deref().unwrap().contains("invalid commit hash"));
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_timeout_rolls_back_once() {
    let h = Harness::new();
    h.seed("web", 1, Stage::Succeeded).await;

    let started = Instant::now();
    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    // Polls at 10s..590s; the deadline at 600s wins over the last tick
    assert_eq!(h.platform.poll_count(), 59);
    assert_eq!(started.elapsed(), Duration::from_secs(600));
    assert_eq!(
        *h.platform.rollbacks.lock().unwrap(),
        vec![("web".to_string(), version(1))]
    );

    let record = h.records("web").pop().unwrap();
    assert_eq!(record.version, version(2));
    assert_eq!(record.stage, Stage::RolledBack);
    assert_eq!(record.rolled_back_from_version, Some(version(2)));
    assert_eq!(record.rollback_target, Some(version(1)));
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .contains("monitoring timed out"));
    assert_eq!(count_stage(&record.stages(), Stage::RollingBack), 1);

    // Nothing else happens afterwards
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.platform.rollbacks.lock().unwrap().len(), 1);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_targets_latest_prior_success() {
    let h = Harness::new();
    h.seed("web", 1, Stage::Succeeded).await;
    h.seed("web", 2, Stage::Succeeded).await;
    h.seed("web", 3, Stage::Failed).await;
    h.seed("web", 4, Stage::RolledBack).await;
    // Another application's history is irrelevant
    h.seed("api", 7, Stage::Succeeded).await;
    h.platform.script_status(PlatformStatus::Failure);

    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    assert_eq!(
        *h.platform.rollbacks.lock().unwrap(),
        vec![("web".to_string(), version(2))]
    );
    let record = h.records("web").pop().unwrap();
    assert_eq!(record.version, version(5));
    assert_eq!(record.stage, Stage::RolledBack);
    assert_eq!(record.rollback_target, Some(version(2)));
    assert_eq!(record.last_error.as_deref(), Some("platform reported failure"));

    let summary = render_summary(&h.notifier.records()[0]);
    assert!(summary.contains("rolled back to 20240101.2"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_without_stable_version() {
    let h = Harness::new();
    h.seed("web", 1, Stage::Failed).await;
    h.platform.script_status(PlatformStatus::Failure);

    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    assert!(h.platform.rollbacks.lock().unwrap().is_empty());
    let record = h.records("web").pop().unwrap();
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.last_error.as_deref(), Some(NO_STABLE_VERSION));
    assert!(record.rolled_back_from_version.is_none());
    let stages = record.stages();
    assert_eq!(&stages[stages.len() - 2..], &[Stage::RollingBack, Stage::Failed]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_rollback_fails() {
    let h = Harness::new();
    h.seed("web", 1, Stage::Succeeded).await;
    h.platform.script_status(PlatformStatus::Failure);
    h.platform
        .script_rollback(Err(PlatformError::Permanent("version not found".to_string())));

    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    let record = h.records("web").pop().unwrap();
    assert_eq!(record.stage, Stage::Failed);
    assert!(record.rolled_back_from_version.is_none());
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("rollback to 20240101.1 failed"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_errors_are_retried() {
    let h = Harness::new();
    h.platform
        .script_status_error(PlatformError::Transient("connection reset".to_string()));
    h.platform
        .script_status_error(PlatformError::Transient("connection reset".to_string()));
    h.platform.script_status(PlatformStatus::Success);

    assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    h.notifier.wait_for(1).await;

    assert_eq!(h.platform.poll_count(), 3);
    assert_eq!(h.records("web")[0].stage, Stage::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_deliveries_are_acknowledged() {
    let h = Harness::new();

    let first = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    assert!(matches!(first, Admission::Started { .. }));

    let again = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    assert_eq!(
        again,
        Admission::Duplicate {
            application_id: "web".to_string()
        }
    );

    h.platform.set_default_status(PlatformStatus::Success);
    h.notifier.wait_for(1).await;

    // Still inside the window after the record finished
    let late = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    assert!(matches!(late, Admission::Duplicate { .. }));
    assert_eq!(h.records("web").len(), 1);

    // Outside the window it deploys again
    h.clock.advance(chrono::Duration::minutes(61));
    assert_eq!(h.orchestrator.prune_dedupe().await, 1);
    let redeploy = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    match redeploy {
        Admission::Started { version: v, .. } => assert_eq!(v, version(2)),
        other => panic!("unexpected admission: {:?}", other),
    }
    h.notifier.wait_for(2).await;
    assert_eq!(h.platform.triggers.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_burst_deploys_only_the_latest_commit() {
    let h = Harness::new();

    let a1 = assert_ok!(h.orchestrator.submit(push("acme/web", "a1")).await);
    assert!(matches!(a1, Admission::Started { .. }));

    let a2 = assert_ok!(h.orchestrator.submit(push("acme/web", "a2")).await);
    assert_eq!(
        a2,
        Admission::Queued {
            application_id: "web".to_string()
        }
    );

    let a3 = assert_ok!(h.orchestrator.submit(push("acme/web", "a3")).await);
    assert_eq!(
        a3,
        Admission::Superseded {
            application_id: "web".to_string(),
            replaced_commit: "a2".to_string()
        }
    );

    let a4 = assert_ok!(h.orchestrator.submit(push("acme/web", "a4")).await);
    assert!(matches!(a4, Admission::Superseded { ref replaced_commit, .. } if replaced_commit == "a3"));

    // The queued event is durable while it waits
    let pending = assert_ok!(h.store.load_pending().await);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].1.commit_hash, "a4");

    h.platform.set_default_status(PlatformStatus::Success);
    h.notifier.wait_for(2).await;
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.platform.triggered_commits(), vec!["a1", "a4"]);
    assert_eq!(h.notifier.count(), 2);
    assert_eq!(h.store.max_in_flight("web"), 1);
    assert!(assert_ok!(h.store.load_pending().await).is_empty());

    let records = h.records("web");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].version, version(2));
    // a2, a3 and a4 were folded into the second deployment
    assert_eq!(records[1].source_commit.commit_count, 3);
    assert_eq!(records[1].commits_since_last_success, 3);
}

#[tokio::test(start_paused = true)]
async fn test_applications_deploy_in_parallel() {
    let h = Harness::new();

    assert_ok!(h.orchestrator.submit(push("acme/web", "aaa111")).await);
    assert_ok!(h.orchestrator.submit(push("acme/api", "bbb222")).await);

    // Both are triggered before either finishes
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.platform.triggers.lock().unwrap().len(), 2);
    assert_eq!(h.notifier.count(), 0);

    h.platform.set_default_status(PlatformStatus::Success);
    h.notifier.wait_for(2).await;

    assert_eq!(h.records("web")[0].stage, Stage::Succeeded);
    assert_eq!(h.records("api")[0].stage, Stage::Succeeded);
    // Version sequences are per application
    assert_eq!(h.records("api")[0].version, version(1));
    assert_eq!(h.store.max_in_flight("web"), 1);
    assert_eq!(h.store.max_in_flight("api"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_notification_per_record() {
    let h = Harness::new();
    h.platform.script_status(PlatformStatus::Failure);

    assert_ok!(h.orchestrator.submit(push("acme/web", "c1")).await);
    assert_ok!(h.orchestrator.submit(push("acme/web", "c2")).await);
    h.platform.set_default_status(PlatformStatus::Success);

    h.notifier.wait_for(2).await;
    tokio::time::sleep(Duration::from_secs(7200)).await;

    let notified = h.notifier.records();
    assert_eq!(notified.len(), 2);
    let ids: HashSet<_> = notified.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), 2);

    let records = h.records("web");
    assert!(records.iter().all(|r| r.is_terminal()));
    assert!(records.iter().all(|r| ids.contains(&r.id)));
    assert_eq!(records[0].stage, Stage::Failed);
    assert_eq!(records[1].stage, Stage::Succeeded);
    // The failed deployment's commit still counts towards the next success
    assert_eq!(records[1].commits_since_last_success, 2);
    assert!(records.iter().all(|r| !r.notification_pending));
}

#[tokio::test(start_paused = true)]
async fn test_final_stage_is_stored_before_the_slot_is_released() {
    let h = Harness::new();
    h.platform
        .script_trigger(Err(PlatformError::Permanent("unknown application".to_string())));
    assert_ok!(h.orchestrator.submit(push("acme/web", "aaa111")).await);
    h.store.fail_writes.store(true, Ordering::SeqCst);

    // Nothing is announced while the outcome is not stored
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.notifier.count(), 0);
    assert_eq!(h.records("web")[0].stage, Stage::Received);

    h.store.fail_writes.store(false, Ordering::SeqCst);
    h.notifier.wait_for(1).await;
    assert_eq!(h.records("web")[0].stage, Stage::Failed);

    // The application takes the next push
    h.platform.set_default_status(PlatformStatus::Success);
    let next = assert_ok!(h.orchestrator.submit(push("acme/web", "bbb222")).await);
    assert!(matches!(next, Admission::Started { version: v, .. } if v == version(2)));
    h.notifier.wait_for(2).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let records = h.records("web");
    assert_eq!(records[1].stage, Stage::Succeeded);
    assert_eq!(h.notifier.count(), 2);
    assert!(records.iter().all(|r| !r.notification_pending));
}

#[tokio::test(start_paused = true)]
async fn test_stale_in_flight_record_does_not_block_deploys() {
    let h = Harness::new();
    h.platform.set_default_status(PlatformStatus::Success);
    // Stored as in flight, but nothing drives it
    h.seed("web", 1, Stage::Triggering).await;

    let admission = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    assert!(matches!(admission, Admission::Started { version: v, .. } if v == version(2)));
    h.notifier.wait_for(1).await;

    assert_eq!(h.platform.triggered_commits(), vec!["abc123"]);
    assert_eq!(h.records("web")[1].stage, Stage::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_failed_commit_is_duplicate() {
    let h = Harness::new();
    h.platform
        .script_trigger(Err(PlatformError::Permanent("unknown application".to_string())));
    assert_ok!(h.orchestrator.submit(push("acme/web", "aaa111")).await);
    h.notifier.wait_for(1).await;

    let again = assert_ok!(h.orchestrator.submit(push("acme/web", "aaa111")).await);
    assert!(matches!(again, Admission::Duplicate { .. }));
    assert_eq!(h.records("web").len(), 1);
    assert_eq!(h.platform.triggers.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_application_mapping() {
    let mut opts = options();
    opts.applications = HashMap::from([("acme/website".to_string(), "web-prod".to_string())]);
    let h = Harness::with_options(opts);
    h.platform.set_default_status(PlatformStatus::Success);

    let admission = assert_ok!(h.orchestrator.submit(push("acme/website", "abc123")).await);
    assert_eq!(admission.application_id(), "web-prod");
    h.notifier.wait_for(1).await;
    assert_eq!(h.platform.triggers.lock().unwrap()[0].0, "web-prod");
}

#[tokio::test(start_paused = true)]
async fn test_store_unavailable_rejects_submission() {
    let h = Harness::new();
    assert_ok!(h.orchestrator.submit(push("acme/web", "aaa111")).await);

    h.store.fail_writes.store(true, Ordering::SeqCst);
    // Busy application: the pending event cannot be stored
    assert_err!(h.orchestrator.submit(push("acme/web", "bbb222")).await);
    // Idle application: the record cannot be stored
    assert_err!(h.orchestrator.submit(push("acme/api", "ccc333")).await);
    assert!(h.records("api").is_empty());

    // Neither delivery counts as accepted once the store is back
    h.store.fail_writes.store(false, Ordering::SeqCst);
    let retried = assert_ok!(h.orchestrator.submit(push("acme/api", "ccc333")).await);
    assert!(matches!(retried, Admission::Started { .. }));
    let retried = assert_ok!(h.orchestrator.submit(push("acme/web", "bbb222")).await);
    assert!(matches!(retried, Admission::Queued { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resumes_in_flight_records() {
    let h = Harness::new();
    h.platform.set_default_status(PlatformStatus::Success);

    // Accepted by the platform before the restart
    let mut monitoring = h.seed("web", 1, Stage::Monitoring).await;
    monitoring.platform_deployment_id = Some("dep-9".to_string());
    monitoring.history.push(StageTransition {
        stage: Stage::Monitoring,
        at: h.clock.now(),
    });
    assert_ok!(h.store.save(&monitoring).await);

    // Never reached the platform
    h.seed("api", 1, Stage::Triggering).await;

    // Queued behind a deployment that no longer exists
    assert_ok!(
        h.store
            .save_pending("docs", Some(&push("acme/docs", "d0c5")))
            .await
    );

    let resumed = assert_ok!(h.orchestrator.recover().await);
    assert_eq!(resumed, 1);
    h.notifier.wait_for(3).await;

    // The platform is queried before anything else
    assert_eq!(h.platform.polls.lock().unwrap()[0], "dep-9");
    assert_eq!(h.platform.triggered_commits(), vec!["d0c5"]);

    let web = h.records("web").pop().unwrap();
    assert_eq!(web.stage, Stage::Succeeded);

    let api = h.records("api").pop().unwrap();
    assert_eq!(api.stage, Stage::Failed);
    assert_eq!(api.last_error.as_deref(), Some(INTERRUPTED));

    let docs = h.records("docs").pop().unwrap();
    assert_eq!(docs.stage, Stage::Succeeded);
    assert!(assert_ok!(h.store.load_pending().await).is_empty());

    // New versions continue after the recovered ones
    h.clock.advance(chrono::Duration::hours(2));
    let next = assert_ok!(h.orchestrator.submit(push("acme/web", "abc123")).await);
    assert!(matches!(next, Admission::Started { version: v, .. } if v == version(2)));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_keeps_remaining_monitoring_time() {
    let h = Harness::new();

    let mut record = h.seed("web", 1, Stage::Monitoring).await;
    record.platform_deployment_id = Some("dep-1".to_string());
    record.history.push(StageTransition {
        stage: Stage::Monitoring,
        at: h.clock.now() - chrono::Duration::seconds(590),
    });
    assert_ok!(h.store.save(&record).await);

    let started = Instant::now();
    assert_ok!(h.orchestrator.recover().await);
    h.notifier.wait_for(1).await;

    // One immediate poll, then the remaining 10s run out
    assert_eq!(h.platform.poll_count(), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    let record = h.records("web").pop().unwrap();
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.last_error.as_deref(), Some(NO_STABLE_VERSION));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_announces_unannounced_outcomes() {
    let h = Harness::new();

    // Finished before the restart, announcement never went out
    let mut finished = h.seed("web", 1, Stage::RolledBack).await;
    finished.notification_pending = true;
    assert_ok!(h.store.save(&finished).await);
    // Already announced
    h.seed("api", 1, Stage::Succeeded).await;

    assert_eq!(assert_ok!(h.orchestrator.recover().await), 0);
    h.notifier.wait_for(1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let notified = h.notifier.records();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].id, finished.id);
    assert!(!h.records("web")[0].notification_pending);
    assert!(h.platform.triggers.lock().unwrap().is_empty());

    // A later restart has nothing left to announce
    assert_ok!(h.orchestrator.recover().await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.notifier.count(), 1);
}
