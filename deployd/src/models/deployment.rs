//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A normalized push to the deployment branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Repository full name (`owner/name`)
    pub repository: String,

    /// Branch name without the `refs/heads/` prefix
    pub branch: String,

    /// Commit SHA the branch now points at
    pub commit_hash: String,

    /// Head commit message
    pub commit_message: String,

    /// Head commit author
    pub author_name: String,

    /// When the webhook was received
    pub received_at: DateTime<Utc>,

    /// Commits carried by this push (and by any push it superseded)
    #[serde(default = "default_commit_count")]
    pub commit_count: u32,
}

fn default_commit_count() -> u32 {
    1
}

/// Deployment version, `YYYYMMDD.N` where N is a per-day sequence starting at 1.
///
/// Orders by date first, then sequence, so `20240101.10 > 20240101.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    date: NaiveDate,
    sequence: u32,
}

impl Version {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self { date, sequence }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.date.format("%Y%m%d"), self.sequence)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (date, sequence) = s
            .split_once('.')
            .ok_or_else(|| format!("Invalid version: {}", s))?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|e| format!("Invalid version date '{}': {}", date, e))?;
        let sequence: u32 = sequence
            .parse()
            .map_err(|e| format!("Invalid version sequence '{}': {}", sequence, e))?;
        if sequence == 0 {
            return Err(format!("Invalid version sequence in {}", s));
        }
        Ok(Self { date, sequence })
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Deployment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validating,
    Triggering,
    Deploying,
    Monitoring,
    RollingBack,
    Succeeded,
    Failed,
    RolledBack,
}

impl Stage {
    /// Terminal stages have no further automatic transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed | Stage::RolledBack)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::Validating => "validating",
            Stage::Triggering => "triggering",
            Stage::Deploying => "deploying",
            Stage::Monitoring => "monitoring",
            Stage::RollingBack => "rolling back",
            Stage::Succeeded => "succeeded",
            Stage::Failed => "failed",
            Stage::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// One entry of a record's stage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// One deployment attempt, tracked end to end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique record ID
    pub id: String,

    /// Target application on the platform
    pub application_id: String,

    /// Allocated version
    pub version: Version,

    /// The push that caused this attempt
    pub source_commit: PushEvent,

    /// Current stage
    pub stage: Stage,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Remaining attempts for the current stage's transient-error retries
    pub attempts_remaining: u32,

    pub last_error: Option<String>,

    /// Set only once the record reaches `RolledBack`
    pub rolled_back_from_version: Option<Version>,

    /// Platform deployment ID, known once the trigger was accepted
    #[serde(default)]
    pub platform_deployment_id: Option<String>,

    /// Latest logs URL reported by the platform
    #[serde(default)]
    pub logs_url: Option<String>,

    /// Prior stable version a rollback aims at
    #[serde(default)]
    pub rollback_target: Option<Version>,

    /// Commits pushed since the application's last successful deployment
    #[serde(default = "default_commit_count")]
    pub commits_since_last_success: u32,

    /// Stage history, oldest first
    #[serde(default)]
    pub history: Vec<StageTransition>,

    /// Set with the terminal stage, cleared once the outcome was announced
    #[serde(default)]
    pub notification_pending: bool,
}

impl DeploymentRecord {
    /// Create a record in the `Received` stage
    pub fn new(
        application_id: String,
        version: Version,
        source_commit: PushEvent,
        attempts: u32,
        commits_since_last_success: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            application_id,
            version,
            source_commit,
            stage: Stage::Received,
            started_at: now,
            finished_at: None,
            attempts_remaining: attempts,
            last_error: None,
            rolled_back_from_version: None,
            platform_deployment_id: None,
            logs_url: None,
            rollback_target: None,
            commits_since_last_success,
            history: vec![StageTransition {
                stage: Stage::Received,
                at: now,
            }],
            notification_pending: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn commit_hash(&self) -> &str {
        &self.source_commit.commit_hash
    }

    /// Stages this record has passed through, in order
    pub fn stages(&self) -> Vec<Stage> {
        self.history.iter().map(|t| t.stage).collect()
    }
}
