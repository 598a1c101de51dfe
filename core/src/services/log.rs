use anyhow::{anyhow, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::report::{TaskOutcome, TaskReport};

/// Install the global fmt subscriber with the given filter directive.
pub fn init(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
}

/// Log a finished task at a level matching its outcome.
pub fn task_report(report: &TaskReport) {
    let task = report.task;
    let elapsed_ms = report.elapsed_ms;
    match &report.outcome {
        TaskOutcome::Completed { cleaned: 0, .. } => {
            debug!(task, elapsed_ms, "nothing to clean")
        }
        TaskOutcome::Completed { cleaned, batches } => {
            info!(task, cleaned, batches, elapsed_ms, "cleanup task finished")
        }
        TaskOutcome::Failed {
            cleaned,
            kind,
            error,
        } if kind.self_heals() => {
            warn!(task, cleaned, ?kind, elapsed_ms, "cleanup task aborted, retrying next sweep: {error}")
        }
        TaskOutcome::Failed {
            cleaned,
            kind,
            error,
        } => {
            error!(task, cleaned, ?kind, elapsed_ms, "cleanup task failed: {error}")
        }
    }
}
