//! Dedupe pruning worker

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::orchestrator::Orchestrator;

/// Pruning worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between pruning passes
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Run the pruning worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    orchestrator: Arc<Orchestrator>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Dedupe pruning worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dedupe pruning worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let pruned = orchestrator.prune_dedupe().await;
        if pruned > 0 {
            info!("Pruned {} expired dedupe entries", pruned);
        } else {
            debug!("No expired dedupe entries");
        }
    }
}
