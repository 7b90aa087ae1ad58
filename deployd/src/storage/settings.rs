//! Settings file management

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::fsm::FsmSettings;
use crate::errors::DeploydError;
use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;
use crate::utils::CooldownOptions;

/// Prefix of environment variables overriding the settings file
pub const ENV_PREFIX: &str = "DEPLOYD_";

/// Service settings.
///
/// Loaded from `settings.json` in the data directory, then overridden by
/// `DEPLOYD_*` environment variables. Secrets are plain strings here and get
/// wrapped in `SecretString` by the components that hold them.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file under `logs/`
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// HMAC key shared with the webhook provider
    #[serde(default)]
    pub shared_secret: String,

    /// Only pushes to this branch deploy
    #[serde(default = "default_branch")]
    pub deployment_branch: String,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    #[serde(default = "default_monitor_timeout")]
    pub monitor_timeout_seconds: u64,

    #[serde(default = "default_trigger_retry_max")]
    pub trigger_retry_max: u32,

    #[serde(default = "default_notification_retry_max")]
    pub notification_retry_max: u32,

    /// Window in which a repeated commit is treated as a duplicate delivery
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window_seconds: u64,

    /// Timeout applied to every platform call
    #[serde(default = "default_call_timeout")]
    pub platform_call_timeout_seconds: u64,

    /// Deployment platform API
    #[serde(default)]
    pub platform: PlatformSettings,

    /// Repository full name to platform application ID
    #[serde(default)]
    pub applications: HashMap<String, String>,

    /// Text-to-speech provider (optional)
    #[serde(default)]
    pub voice: Option<VoiceSettings>,

    /// Messaging channel (optional)
    #[serde(default)]
    pub messaging: Option<MessagingSettings>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_monitor_timeout() -> u64 {
    600
}

fn default_trigger_retry_max() -> u32 {
    3
}

fn default_notification_retry_max() -> u32 {
    2
}

fn default_dedupe_window() -> u64 {
    3600
}

fn default_call_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            shared_secret: String::new(),
            deployment_branch: default_branch(),
            monitor_interval_seconds: default_monitor_interval(),
            monitor_timeout_seconds: default_monitor_timeout(),
            trigger_retry_max: default_trigger_retry_max(),
            notification_retry_max: default_notification_retry_max(),
            dedupe_window_seconds: default_dedupe_window(),
            platform_call_timeout_seconds: default_call_timeout(),
            platform: PlatformSettings::default(),
            applications: HashMap::new(),
            voice: None,
            messaging: None,
        }
    }
}

impl Settings {
    /// Load the settings file (defaults if absent) and apply environment overrides
    pub async fn load(layout: &StorageLayout) -> Result<Self, DeploydError> {
        let mut settings = layout
            .settings_file()
            .read_json_opt::<Settings>()
            .await?
            .unwrap_or_default();
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Apply `DEPLOYD_*` overrides
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), DeploydError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name.to_lowercase().as_str() {
                "log_level" => {
                    self.log_level = value.parse().map_err(DeploydError::ConfigError)?;
                }
                "log_json" => self.log_json = parse_env(&key, &value)?,
                "log_to_file" => self.log_to_file = parse_env(&key, &value)?,
                "host" => self.server.host = value,
                "port" => self.server.port = parse_env(&key, &value)?,
                "shared_secret" => self.shared_secret = value,
                "deployment_branch" => self.deployment_branch = value,
                "monitor_interval_seconds" => {
                    self.monitor_interval_seconds = parse_env(&key, &value)?
                }
                "monitor_timeout_seconds" => {
                    self.monitor_timeout_seconds = parse_env(&key, &value)?
                }
                "trigger_retry_max" => self.trigger_retry_max = parse_env(&key, &value)?,
                "notification_retry_max" => {
                    self.notification_retry_max = parse_env(&key, &value)?
                }
                "dedupe_window_seconds" => self.dedupe_window_seconds = parse_env(&key, &value)?,
                "platform_call_timeout_seconds" => {
                    self.platform_call_timeout_seconds = parse_env(&key, &value)?
                }
                "platform_base_url" => self.platform.base_url = value,
                "platform_api_token" => self.platform.api_token = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), DeploydError> {
        if self.shared_secret.is_empty() {
            return Err(DeploydError::ConfigError(
                "shared_secret must be set".to_string(),
            ));
        }
        if self.deployment_branch.trim().is_empty() {
            return Err(DeploydError::ConfigError(
                "deployment_branch must not be empty".to_string(),
            ));
        }
        if self.monitor_interval_seconds == 0 {
            return Err(DeploydError::ConfigError(
                "monitor_interval_seconds must be positive".to_string(),
            ));
        }
        if self.monitor_timeout_seconds < self.monitor_interval_seconds {
            return Err(DeploydError::ConfigError(
                "monitor_timeout_seconds must be at least monitor_interval_seconds".to_string(),
            ));
        }
        if self.trigger_retry_max == 0 {
            return Err(DeploydError::ConfigError(
                "trigger_retry_max must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.platform.base_url).map_err(|e| {
            DeploydError::ConfigError(format!(
                "invalid platform.base_url '{}': {}",
                self.platform.base_url, e
            ))
        })?;
        Ok(())
    }

    /// State machine settings derived from these settings
    pub fn fsm_settings(&self) -> FsmSettings {
        FsmSettings {
            retry_count: self.trigger_retry_max,
            retry_backoff: CooldownOptions::default(),
            call_timeout: Duration::from_secs(self.platform_call_timeout_seconds),
            monitor_interval: Duration::from_secs(self.monitor_interval_seconds),
            monitor_timeout: Duration::from_secs(self.monitor_timeout_seconds),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DeploydError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DeploydError::ConfigError(format!("{}='{}': {}", key, value, e)))
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Deployment platform API settings
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_platform_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_token: String,
}

fn default_platform_url() -> String {
    "http://localhost:9000/api/v1".to_string()
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            api_token: String::new(),
        }
    }
}

/// Text-to-speech settings
#[derive(Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Messaging settings
#[derive(Clone, Serialize, Deserialize)]
pub struct MessagingSettings {
    #[serde(default = "default_messaging_url")]
    pub base_url: String,
    pub bot_token: String,
    pub chat_id: String,
}

fn default_messaging_url() -> String {
    "https://api.telegram.org".to_string()
}
