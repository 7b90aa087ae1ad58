//! Finite state machine for deployment records
//!
//! Only the orchestrator feeds events into the machine; every stage change
//! goes through [`DeploymentRecord::process`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::deployment::{DeploymentRecord, Stage, StageTransition, Version};
use crate::utils::CooldownOptions;

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Attempts for trigger and rollback calls (transient errors only)
    pub retry_count: u32,

    /// Backoff between attempts
    pub retry_backoff: CooldownOptions,

    /// Timeout for each platform call
    pub call_timeout: Duration,

    /// Delay between status polls
    pub monitor_interval: Duration,

    /// Maximum time spent in `Monitoring`
    pub monitor_timeout: Duration,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_backoff: CooldownOptions::default(),
            call_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(600),
        }
    }
}

/// Stage event
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Start pre-flight checks
    Validate,

    /// Pre-flight checks passed
    Trigger,

    /// A platform call failed transiently and will be retried
    Retry(String),

    /// Platform accepted the deployment
    Accepted { platform_deployment_id: String },

    /// Start polling the platform
    Monitor { retry_budget: u32 },

    /// A status poll answered without a terminal status
    Observed {
        logs_url: Option<String>,
        retry_budget: u32,
    },

    /// Platform reported success
    Succeeded { logs_url: Option<String> },

    /// Platform reported failure or monitoring timed out
    RollBack {
        reason: String,
        target: Option<Version>,
        retry_budget: u32,
    },

    /// Platform accepted the rollback
    RolledBack,

    /// Unrecoverable failure
    Fail(String),

    /// Re-enter monitoring after a restart
    Resume { retry_budget: u32 },
}

impl DeploymentRecord {
    /// Process an event and transition stage
    pub fn process(&mut self, event: StageEvent, at: DateTime<Utc>) -> Result<(), String> {
        let new_stage = match (self.stage, event) {
            // From Received
            (Stage::Received, StageEvent::Validate) => Stage::Validating,

            // From Validating
            (Stage::Validating, StageEvent::Trigger) => Stage::Triggering,

            // Transient retries stay in place
            (
                stage @ (Stage::Triggering | Stage::Monitoring | Stage::RollingBack),
                StageEvent::Retry(err),
            ) => {
                self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
                self.last_error = Some(err);
                stage
            }

            // From Triggering
            (Stage::Triggering, StageEvent::Accepted { platform_deployment_id }) => {
                self.platform_deployment_id = Some(platform_deployment_id);
                self.last_error = None;
                Stage::Deploying
            }

            // From Deploying
            (Stage::Deploying, StageEvent::Monitor { retry_budget }) => {
                self.attempts_remaining = retry_budget;
                Stage::Monitoring
            }

            // From Monitoring
            (Stage::Monitoring, StageEvent::Observed { logs_url, retry_budget }) => {
                if logs_url.is_some() {
                    self.logs_url = logs_url;
                }
                self.attempts_remaining = retry_budget;
                Stage::Monitoring
            }
            (Stage::Monitoring, StageEvent::Succeeded { logs_url }) => {
                if logs_url.is_some() {
                    self.logs_url = logs_url;
                }
                self.last_error = None;
                Stage::Succeeded
            }
            (
                Stage::Monitoring,
                StageEvent::RollBack {
                    reason,
                    target,
                    retry_budget,
                },
            ) => {
                self.last_error = Some(reason);
                self.rollback_target = target;
                self.attempts_remaining = retry_budget;
                Stage::RollingBack
            }

            // From RollingBack
            (Stage::RollingBack, StageEvent::RolledBack) if self.rollback_target.is_some() => {
                self.rolled_back_from_version = Some(self.version);
                Stage::RolledBack
            }

            // Any in-flight stage may fail
            (stage, StageEvent::Fail(err)) if !stage.is_terminal() => {
                self.last_error = Some(err);
                Stage::Failed
            }

            // Recovery
            (stage, StageEvent::Resume { retry_budget })
                if !stage.is_terminal() && self.platform_deployment_id.is_some() =>
            {
                self.attempts_remaining = retry_budget;
                Stage::Monitoring
            }

            // Invalid transitions
            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        if new_stage != self.stage {
            self.stage = new_stage;
            self.history.push(StageTransition {
                stage: new_stage,
                at,
            });
        }
        if new_stage.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    /// Whether the current stage may retry another platform call
    pub fn can_retry(&self) -> bool {
        !self.stage.is_terminal() && self.attempts_remaining > 0
    }
}
