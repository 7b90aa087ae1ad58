//! Application state management

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::app::options::{AppOptions, NotificationOptions};
use crate::deploy::orchestrator::{Clock, Orchestrator, SystemClock};
use crate::errors::DeploydError;
use crate::http::messaging::{BotMessenger, Messenger};
use crate::http::platform::HttpPlatformClient;
use crate::http::voice::{HttpSpeechSynthesizer, SpeechSynthesizer};
use crate::notify::dispatcher::NotificationDispatcher;
use crate::storage::counter::VersionAllocator;
use crate::storage::records::FileRecordStore;

/// Main application state
pub struct AppState {
    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Clock shared by the orchestrator and the webhook handler
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeploydError> {
        info!("Initializing application state...");

        let layout = &options.storage;
        layout.setup().await?;

        let platform = Arc::new(HttpPlatformClient::new(
            &options.platform.base_url,
            SecretString::from(options.platform.api_token.expose_secret()),
            options.orchestrator.fsm.call_timeout,
        )?);
        let store = Arc::new(FileRecordStore::new(layout));
        let versions = Arc::new(VersionAllocator::open(layout.counters_file()).await?);
        let notifier = Arc::new(init_dispatcher(&options.notifications)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let orchestrator = Orchestrator::new(
            options.orchestrator.clone(),
            platform,
            store,
            versions,
            notifier,
            clock.clone(),
        );

        Ok(Self {
            orchestrator,
            clock,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeploydError> {
        info!("Shutting down application state...");
        // In-flight deployments are persisted on every transition and resume
        // at the next start
        Ok(())
    }
}

fn init_dispatcher(options: &NotificationOptions) -> Result<NotificationDispatcher, DeploydError> {
    let voice: Option<Arc<dyn SpeechSynthesizer>> = match &options.voice {
        Some(voice) => Some(Arc::new(HttpSpeechSynthesizer::new(
            &voice.base_url,
            SecretString::from(voice.api_key.expose_secret()),
            voice.voice_id.clone(),
            voice.model_id.clone(),
            options.call_timeout,
        )?)),
        None => None,
    };

    let messenger: Option<Arc<dyn Messenger>> = match &options.messaging {
        Some(messaging) => Some(Arc::new(BotMessenger::new(
            &messaging.base_url,
            SecretString::from(messaging.bot_token.expose_secret()),
            messaging.chat_id.clone(),
            options.call_timeout,
        )?)),
        None => {
            info!("No messaging channel configured, outcomes will only be logged");
            None
        }
    };

    Ok(NotificationDispatcher::new(
        voice,
        messenger,
        options.dispatcher.clone(),
    ))
}
