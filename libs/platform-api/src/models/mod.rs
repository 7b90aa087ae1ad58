//! API models

use serde::{Deserialize, Serialize};

// ================================ PLATFORM ===================================== //

/// Trigger deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDeploymentRequest {
    pub commit_hash: String,
    pub version: String,
}

/// Rollback request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub target_version: String,
}

/// Returned by the platform when it accepts a deployment or rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAccepted {
    pub id: String,
}

/// Platform-side deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl PlatformStatus {
    /// Whether the platform will report no further changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlatformStatus::Success | PlatformStatus::Failure)
    }
}

/// Deployment status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    pub id: String,
    pub status: PlatformStatus,
    #[serde(default)]
    pub logs_url: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ================================== VOICE ====================================== //

/// Text-to-speech request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

// ================================ MESSAGING ==================================== //

/// Plain text message request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub text: String,
}

/// Envelope returned by the messaging API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A delivered message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}
