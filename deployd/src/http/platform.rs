//! Deployment platform API client

use std::time::Duration;

use async_trait::async_trait;
use platform_api::models::{
    DeploymentAccepted, DeploymentStatusResponse, PlatformStatus, RollbackRequest,
    TriggerDeploymentRequest,
};
use secrecy::SecretString;

use crate::errors::{DeploydError, PlatformError};
use crate::http::client::HttpClient;
use crate::models::deployment::Version;

/// Platform-assigned deployment identifier
pub type PlatformDeploymentId = String;

/// Status of one platform deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: PlatformStatus,
    pub logs_url: Option<String>,
}

/// Deployment platform operations.
///
/// Implementations honour the caller's timeout, classify failures as
/// transient or permanent, and never retry on their own.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Start deploying `commit_hash` of `application_id` as `version`
    async fn trigger(
        &self,
        application_id: &str,
        commit_hash: &str,
        version: &Version,
        timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError>;

    /// Current status of a platform deployment
    async fn get_status(
        &self,
        deployment_id: &str,
        timeout: Duration,
    ) -> Result<StatusReport, PlatformError>;

    /// Redeploy `target_version` of `application_id`
    async fn rollback(
        &self,
        application_id: &str,
        target_version: &Version,
        timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError>;
}

/// HTTPS implementation of [`PlatformClient`]
pub struct HttpPlatformClient {
    http: HttpClient,
}

impl HttpPlatformClient {
    pub fn new(
        base_url: &str,
        api_token: SecretString,
        default_timeout: Duration,
    ) -> Result<Self, DeploydError> {
        let http = HttpClient::new(base_url, default_timeout)?.with_bearer(api_token);
        Ok(Self { http })
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn trigger(
        &self,
        application_id: &str,
        commit_hash: &str,
        version: &Version,
        timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError> {
        let path = format!("/applications/{}/deployments", application_id);
        let body = TriggerDeploymentRequest {
            commit_hash: commit_hash.to_string(),
            version: version.to_string(),
        };
        let accepted: DeploymentAccepted = self.http.post(&path, &body, timeout).await?;
        Ok(accepted.id)
    }

    async fn get_status(
        &self,
        deployment_id: &str,
        timeout: Duration,
    ) -> Result<StatusReport, PlatformError> {
        let path = format!("/deployments/{}", deployment_id);
        let response: DeploymentStatusResponse = self.http.get(&path, timeout).await?;
        Ok(StatusReport {
            status: response.status,
            logs_url: response.logs_url,
        })
    }

    async fn rollback(
        &self,
        application_id: &str,
        target_version: &Version,
        timeout: Duration,
    ) -> Result<PlatformDeploymentId, PlatformError> {
        let path = format!("/applications/{}/rollbacks", application_id);
        let body = RollbackRequest {
            target_version: target_version.to_string(),
        };
        let accepted: DeploymentAccepted = self.http.post(&path, &body, timeout).await?;
        Ok(accepted.id)
    }
}
