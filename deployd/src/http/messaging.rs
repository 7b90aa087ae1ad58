//! Messaging API client

use std::time::Duration;

use async_trait::async_trait;
use platform_api::models::{MessagingResponse, SendMessageRequest, SentMessage};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{DeploydError, PlatformError};
use crate::http::client::HttpClient;

/// Receipt for a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: i64,
}

/// Delivers notifications to a chat
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, PlatformError>;

    async fn send_voice(&self, audio: Vec<u8>, caption: &str)
        -> Result<DeliveryReceipt, PlatformError>;
}

/// Bot-API style messaging client (`sendMessage` / `sendVoice`)
pub struct BotMessenger {
    http: HttpClient,
    bot_token: SecretString,
    chat_id: String,
    timeout: Duration,
}

impl BotMessenger {
    pub fn new(
        base_url: &str,
        bot_token: SecretString,
        chat_id: String,
        timeout: Duration,
    ) -> Result<Self, DeploydError> {
        Ok(Self {
            http: HttpClient::new(base_url, timeout)?,
            bot_token,
            chat_id,
            timeout,
        })
    }

    fn path(&self, method: &str) -> String {
        format!("/bot{}/{}", self.bot_token.expose_secret(), method)
    }
}

fn receipt(response: MessagingResponse<SentMessage>) -> Result<DeliveryReceipt, PlatformError> {
    match (response.ok, response.result) {
        (true, Some(message)) => Ok(DeliveryReceipt {
            message_id: message.message_id,
        }),
        _ => Err(PlatformError::Permanent(
            response
                .description
                .unwrap_or_else(|| "message not delivered".to_string()),
        )),
    }
}

#[async_trait]
impl Messenger for BotMessenger {
    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, PlatformError> {
        let body = SendMessageRequest {
            chat_id: self.chat_id.clone(),
            text: text.to_string(),
        };
        let response: MessagingResponse<SentMessage> = self
            .http
            .post(&self.path("sendMessage"), &body, self.timeout)
            .await?;
        receipt(response)
    }

    async fn send_voice(
        &self,
        audio: Vec<u8>,
        caption: &str,
    ) -> Result<DeliveryReceipt, PlatformError> {
        let voice = Part::bytes(audio)
            .file_name("deployment.mp3")
            .mime_str("audio/mpeg")
            .map_err(|e| PlatformError::Permanent(e.to_string()))?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("voice", voice);
        let response: MessagingResponse<SentMessage> = self
            .http
            .post_multipart(&self.path("sendVoice"), form, self.timeout)
            .await?;
        receipt(response)
    }
}
