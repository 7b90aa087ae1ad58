//! Push payload normalization

use chrono::{DateTime, Utc};
use thiserror::Error;
use webhook_api::models::PushPayload;

use crate::models::deployment::PushEvent;

const BRANCH_PREFIX: &str = "refs/heads/";

/// Payload could not be turned into a push event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Outcome of normalizing a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// A push to the deployment branch
    Push(PushEvent),

    /// Not deployable; acknowledge and drop
    Ignored(String),
}

/// Normalize a raw push payload.
///
/// Pushes to any ref other than `refs/heads/{deployment_branch}` and branch
/// deletions are `Ignored`, not errors.
pub fn normalize(
    raw_payload: &[u8],
    deployment_branch: &str,
    received_at: DateTime<Utc>,
) -> Result<Normalized, ParseError> {
    let payload: PushPayload =
        serde_json::from_slice(raw_payload).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let Some(branch) = payload.git_ref.strip_prefix(BRANCH_PREFIX) else {
        return Ok(Normalized::Ignored(format!(
            "ref {} is not a branch",
            payload.git_ref
        )));
    };
    if branch != deployment_branch {
        return Ok(Normalized::Ignored(format!(
            "branch {} is not the deployment branch {}",
            branch, deployment_branch
        )));
    }

    if payload.deleted || is_zero_sha(&payload.after) {
        return Ok(Normalized::Ignored(format!("branch {} was deleted", branch)));
    }

    if payload.after.trim().is_empty() {
        return Err(ParseError::MissingField("after"));
    }
    if payload.repository.full_name.trim().is_empty() {
        return Err(ParseError::MissingField("repository.full_name"));
    }
    let head_commit = payload
        .head_commit
        .ok_or(ParseError::MissingField("head_commit"))?;

    Ok(Normalized::Push(PushEvent {
        repository: payload.repository.full_name,
        branch: branch.to_string(),
        commit_hash: payload.after,
        commit_message: head_commit.message,
        author_name: head_commit.author.name,
        received_at,
        commit_count: commit_count(payload.commits.len()),
    }))
}

/// At least one; saturates on oversized commit lists
fn commit_count(commits: usize) -> u32 {
    u32::try_from(commits.max(1)).unwrap_or(u32::MAX)
}

fn is_zero_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.chars().all(|c| c == '0')
}
