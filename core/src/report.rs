use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorKind, SweepError};

/// Work done by one task invocation so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub cleaned: u64,
    pub batches: u32,
}

impl TaskProgress {
    pub fn record_batch(&mut self, cleaned: usize) {
        self.cleaned += cleaned as u64;
        self.batches += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        cleaned: u64,
        batches: u32,
    },
    /// Aborted for this pass. `cleaned` counts batches committed before the error.
    Failed {
        cleaned: u64,
        kind: ErrorKind,
        error: String,
    },
}

impl TaskOutcome {
    pub fn from_result(progress: TaskProgress, result: Result<(), SweepError>) -> Self {
        match result {
            Ok(()) => TaskOutcome::Completed {
                cleaned: progress.cleaned,
                batches: progress.batches,
            },
            Err(err) => TaskOutcome::Failed {
                cleaned: progress.cleaned,
                kind: err.kind(),
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task: &'static str,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub elapsed_ms: u64,
}

impl TaskReport {
    pub fn cleaned(&self) -> u64 {
        match self.outcome {
            TaskOutcome::Completed { cleaned, .. } | TaskOutcome::Failed { cleaned, .. } => cleaned,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SweepScope {
    Full,
    Club { club_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    #[serde(flatten)]
    pub scope: SweepScope,
    /// Unix milliseconds.
    pub started_at: i64,
    pub elapsed_ms: u64,
    pub tasks: Vec<TaskReport>,
}

impl SweepReport {
    pub fn total_cleaned(&self) -> u64 {
        self.tasks.iter().map(TaskReport::cleaned).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| !t.succeeded())
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_outcome_keeps_partial_progress() {
        let mut progress = TaskProgress::default();
        progress.record_batch(100);
        progress.record_batch(40);
        let report = TaskReport {
            task: "old_notifications",
            outcome: TaskOutcome::from_result(
                progress,
                Err(SweepError::Timeout(std::time::Duration::from_secs(30))),
            ),
            elapsed_ms: 3,
        };
        assert_eq!(report.cleaned(), 140);
        assert!(!report.succeeded());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "task": "old_notifications",
                "status": "failed",
                "cleaned": 140,
                "kind": "transient",
                "error": "store call timed out after 30s",
                "elapsed_ms": 3
            })
        );
    }
}
