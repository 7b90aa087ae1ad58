//! Text-to-speech API client

use std::time::Duration;

use async_trait::async_trait;
use platform_api::models::SpeechRequest;
use secrecy::SecretString;

use crate::errors::{DeploydError, PlatformError};
use crate::http::client::HttpClient;

/// Converts text to audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlatformError>;
}

/// HTTPS text-to-speech client (`POST /v1/text-to-speech/{voice_id}`)
pub struct HttpSpeechSynthesizer {
    http: HttpClient,
    voice_id: String,
    model_id: Option<String>,
    timeout: Duration,
}

impl HttpSpeechSynthesizer {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        voice_id: String,
        model_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeploydError> {
        let http = HttpClient::new(base_url, timeout)?.with_header_auth("xi-api-key", api_key);
        Ok(Self {
            http,
            voice_id,
            model_id,
            timeout,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlatformError> {
        let path = format!("/v1/text-to-speech/{}", self.voice_id);
        let body = SpeechRequest {
            text: text.to_string(),
            model_id: self.model_id.clone(),
        };
        let audio = self.http.post_for_bytes(&path, &body, self.timeout).await?;
        if audio.is_empty() {
            return Err(PlatformError::Permanent("empty audio response".to_string()));
        }
        Ok(audio)
    }
}
