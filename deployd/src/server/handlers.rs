//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, info, warn};
use webhook_api::models::{
    ErrorResponse, HealthResponse, VersionResponse, WebhookDisposition, WebhookResponse,
};

use crate::deploy::orchestrator::Admission;
use crate::models::deployment::Version;
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::webhook::normalize::{normalize, Normalized};
use crate::webhook::signature::SIGNATURE_HEADER;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

fn webhook_response(
    status: StatusCode,
    disposition: WebhookDisposition,
    message: String,
    application_id: Option<String>,
) -> Response {
    (
        status,
        Json(WebhookResponse {
            disposition,
            message,
            application_id,
            record_id: None,
            version: None,
        }),
    )
        .into_response()
}

/// Push webhook handler.
///
/// The signature is checked over the exact request bytes before anything
/// else is looked at.
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !state.validator.validate(&body, signature) {
        warn!("Rejected webhook delivery with an invalid signature");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid signature".to_string(),
        );
    }

    let event = match normalize(&body, &state.deployment_branch, state.clock.now()) {
        Ok(Normalized::Push(event)) => event,
        Ok(Normalized::Ignored(reason)) => {
            debug!("Ignoring webhook delivery: {}", reason);
            return webhook_response(StatusCode::OK, WebhookDisposition::Ignored, reason, None);
        }
        Err(e) => {
            debug!("Dropping malformed webhook delivery: {}", e);
            return webhook_response(
                StatusCode::OK,
                WebhookDisposition::Rejected,
                e.to_string(),
                None,
            );
        }
    };

    let admission = match state.orchestrator.submit(event).await {
        Ok(admission) => admission,
        Err(e) => {
            error!("Failed to accept webhook delivery: {}", e);
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                e.to_string(),
            );
        }
    };

    let application_id = Some(admission.application_id().to_string());
    match admission {
        Admission::Started {
            application_id,
            record_id,
            version,
        } => {
            info!("Started deployment {} of {}", version, application_id);
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    disposition: WebhookDisposition::Started,
                    message: format!("deploying {} as {}", application_id, version),
                    application_id: Some(application_id),
                    record_id: Some(record_id),
                    version: Some(version.to_string()),
                }),
            )
                .into_response()
        }
        Admission::Queued { .. } => webhook_response(
            StatusCode::OK,
            WebhookDisposition::Queued,
            "queued behind the running deployment".to_string(),
            application_id,
        ),
        Admission::Superseded {
            replaced_commit, ..
        } => webhook_response(
            StatusCode::ACCEPTED,
            WebhookDisposition::Superseded,
            format!("queued, superseding {}", replaced_commit),
            application_id,
        ),
        Admission::Duplicate { .. } => webhook_response(
            StatusCode::OK,
            WebhookDisposition::Duplicate,
            "commit already accepted".to_string(),
            application_id,
        ),
    }
}

/// Records of one application, newest first
pub async fn deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(application_id): Path<String>,
) -> Response {
    match state.orchestrator.records(&application_id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            error!("Failed to list deployments of {}: {}", application_id, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
        }
    }
}

/// One record
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path((application_id, version)): Path<(String, String)>,
) -> Response {
    let version: Version = match version.parse() {
        Ok(version) => version,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "bad_request", e),
    };

    match state.orchestrator.record(&application_id, &version).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no deployment {} of {}", version, application_id),
        ),
        Err(e) => {
            error!(
                "Failed to read deployment {} of {}: {}",
                version, application_id, e
            );
            error_response(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
        }
    }
}
