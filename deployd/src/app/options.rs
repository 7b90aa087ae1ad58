//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::notify::dispatcher::DispatcherOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::pruner;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Only pushes to this branch deploy
    pub deployment_branch: String,

    /// Webhook HMAC key
    pub shared_secret: SecretString,

    /// Deployment platform API
    pub platform: PlatformOptions,

    /// Orchestrator options
    pub orchestrator: OrchestratorOptions,

    /// Notification options
    pub notifications: NotificationOptions,

    /// Dedupe pruning worker options
    pub pruner: pruner::Options,
}

impl AppOptions {
    /// Options for `settings`, rooted at `storage`
    pub fn from_settings(settings: &Settings, storage: StorageLayout) -> Self {
        let orchestrator = OrchestratorOptions {
            fsm: settings.fsm_settings(),
            dedupe_window: Duration::from_secs(settings.dedupe_window_seconds),
            applications: settings.applications.clone(),
        };
        let call_timeout = orchestrator.fsm.call_timeout;

        Self {
            lifecycle: LifecycleOptions::default(),
            storage,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            deployment_branch: settings.deployment_branch.clone(),
            shared_secret: SecretString::from(settings.shared_secret.as_str()),
            platform: PlatformOptions {
                base_url: settings.platform.base_url.clone(),
                api_token: SecretString::from(settings.platform.api_token.as_str()),
            },
            orchestrator,
            notifications: NotificationOptions {
                dispatcher: DispatcherOptions {
                    retry_max: settings.notification_retry_max,
                    ..Default::default()
                },
                call_timeout,
                voice: settings.voice.as_ref().map(|voice| VoiceOptions {
                    base_url: voice.base_url.clone(),
                    api_key: SecretString::from(voice.api_key.as_str()),
                    voice_id: voice.voice_id.clone(),
                    model_id: voice.model_id.clone(),
                }),
                messaging: settings.messaging.as_ref().map(|messaging| MessagingOptions {
                    base_url: messaging.base_url.clone(),
                    bot_token: SecretString::from(messaging.bot_token.as_str()),
                    chat_id: messaging.chat_id.clone(),
                }),
            },
            pruner: pruner::Options::default(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Deployment platform options
#[derive(Debug)]
pub struct PlatformOptions {
    pub base_url: String,
    pub api_token: SecretString,
}

/// Notification options
#[derive(Debug)]
pub struct NotificationOptions {
    pub dispatcher: DispatcherOptions,

    /// Timeout for each voice or messaging call
    pub call_timeout: Duration,

    pub voice: Option<VoiceOptions>,
    pub messaging: Option<MessagingOptions>,
}

#[derive(Debug)]
pub struct VoiceOptions {
    pub base_url: String,
    pub api_key: SecretString,
    pub voice_id: String,
    pub model_id: Option<String>,
}

#[derive(Debug)]
pub struct MessagingOptions {
    pub base_url: String,
    pub bot_token: SecretString,
    pub chat_id: String,
}
