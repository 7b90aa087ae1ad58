//! Server state

use std::sync::Arc;

use crate::deploy::orchestrator::{Clock, Orchestrator};
use crate::webhook::signature::SignatureValidator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub validator: SignatureValidator,
    pub deployment_branch: String,
    pub clock: Arc<dyn Clock>,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        validator: SignatureValidator,
        deployment_branch: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orchestrator,
            validator,
            deployment_branch,
            clock,
        }
    }
}
