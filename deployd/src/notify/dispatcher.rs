//! Outcome notifications

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::errors::DeploydError;
use crate::http::messaging::{DeliveryReceipt, Messenger};
use crate::http::voice::SpeechSynthesizer;
use crate::models::deployment::{DeploymentRecord, Stage};

/// Receives every record that reaches a terminal stage, exactly once
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &DeploymentRecord);
}

/// One-line human summary of a finished deployment
pub fn render_summary(record: &DeploymentRecord) -> String {
    let commits = record.commits_since_last_success;
    let plural = if commits == 1 { "commit" } else { "commits" };
    let short_commit: String = record.commit_hash().chars().take(7).collect();

    let outcome = match (record.stage, record.rollback_target) {
        (Stage::RolledBack, Some(target)) => format!("rolled back to {}", target),
        (Stage::Failed, _) => match &record.last_error {
            Some(err) => format!("failed ({})", err),
            None => "failed".to_string(),
        },
        (stage, _) => stage.to_string(),
    };

    format!(
        "{} {} {}: {} {} since last success, head {} by {}",
        record.application_id,
        record.version,
        outcome,
        commits,
        plural,
        short_commit,
        record.source_commit.author_name
    )
}

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Delivery attempts per notification
    pub retry_max: u32,

    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            retry_max: 2,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Speaks the summary and delivers it to the messaging channel.
///
/// Both collaborators are optional; without a messenger the summary is only
/// logged, without a synthesizer (or when synthesis fails) it is sent as text.
pub struct NotificationDispatcher {
    voice: Option<Arc<dyn SpeechSynthesizer>>,
    messenger: Option<Arc<dyn Messenger>>,
    options: DispatcherOptions,
}

impl NotificationDispatcher {
    pub fn new(
        voice: Option<Arc<dyn SpeechSynthesizer>>,
        messenger: Option<Arc<dyn Messenger>>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            voice,
            messenger,
            options,
        }
    }

    async fn deliver(
        &self,
        messenger: &dyn Messenger,
        summary: &str,
    ) -> Result<DeliveryReceipt, DeploydError> {
        if let Some(voice) = &self.voice {
            match voice.synthesize(summary).await {
                Ok(audio) => {
                    return messenger
                        .send_voice(audio, summary)
                        .await
                        .map_err(|e| DeploydError::NotificationError(e.to_string()));
                }
                Err(e) => {
                    warn!("Voice synthesis failed, sending text instead: {}", e);
                }
            }
        }

        messenger
            .send_text(summary)
            .await
            .map_err(|e| DeploydError::NotificationError(e.to_string()))
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify(&self, record: &DeploymentRecord) {
        let summary = render_summary(record);

        let Some(messenger) = &self.messenger else {
            info!("Deployment finished: {}", summary);
            return;
        };

        let attempts = self.options.retry_max.max(1);
        for attempt in 1..=attempts {
            match self.deliver(messenger.as_ref(), &summary).await {
                Ok(receipt) => {
                    info!(
                        "Notified deployment {} (message {}): {}",
                        record.id, receipt.message_id, summary
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "Notification attempt {}/{} for {} failed: {}",
                        attempt, attempts, record.id, e
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        error!("Giving up notifying deployment {}: {}", record.id, summary);
    }
}
