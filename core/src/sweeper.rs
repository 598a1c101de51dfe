use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use store_api::DocumentStore;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collections::unix_millis;
use crate::config::SweeperConfig;
use crate::error::{SweepError, SweepResult};
use crate::events::{EventBus, SweepEvent};
use crate::report::{SweepReport, SweepScope, TaskOutcome, TaskProgress, TaskReport};
use crate::services::{log, timer};
use crate::tasks::{ClubTask, TaskKind, TaskRunner};

/// Documents currently eligible under each age-based policy.
pub type Statistics = BTreeMap<TaskKind, u64>;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Stopped,
    Running,
    Disposed,
}

enum Lifecycle {
    Stopped,
    Running {
        cancel: CancellationToken,
        timer: JoinHandle<()>,
    },
    Disposed,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    config: SweeperConfig,
    events: EventBus,
}

/// Periodically enforces the retention policies against a document store.
///
/// The sweeper owns its timer: dropping it disarms the schedule the same way
/// [`RetentionSweeper::stop`] does.
pub struct RetentionSweeper {
    inner: Arc<Inner>,
    state: Mutex<Lifecycle>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, config: SweeperConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                events: EventBus::new(),
            }),
            state: Mutex::new(Lifecycle::Stopped),
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SweeperState {
        match *self.state.lock() {
            Lifecycle::Stopped => SweeperState::Stopped,
            Lifecycle::Running { .. } => SweeperState::Running,
            Lifecycle::Disposed => SweeperState::Disposed,
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SweepEvent> {
        self.inner.events.subscribe()
    }

    /// Sweep immediately and then on every configured interval.
    ///
    /// Returns `Ok(false)` without arming a second timer when already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> SweepResult<bool> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Disposed => Err(SweepError::Disposed),
            Lifecycle::Running { .. } => {
                debug!("retention sweeper already running");
                Ok(false)
            }
            Lifecycle::Stopped => {
                let cancel = CancellationToken::new();
                let inner = self.inner.clone();
                let timer = timer::spawn_interval(self.inner.config.interval, cancel.clone(), move || {
                    let inner = inner.clone();
                    async move {
                        inner.run_full_sweep().await;
                    }
                });
                *state = Lifecycle::Running { cancel, timer };
                info!(
                    interval_secs = self.inner.config.interval.as_secs(),
                    backend = self.inner.store.backend_name(),
                    "retention sweeper started"
                );
                Ok(true)
            }
        }
    }

    /// Disarm the timer. A sweep already in flight runs to completion.
    pub fn stop(&self) -> bool {
        self.disarm().is_some()
    }

    /// Stop and wait for the timer task, including any in-flight sweep.
    pub async fn shutdown(&self) {
        if let Some(timer) = self.disarm() {
            let _ = timer.await;
        }
    }

    /// Stop for good. A disposed sweeper cannot be started again.
    pub fn dispose(&self) {
        self.disarm();
        *self.state.lock() = Lifecycle::Disposed;
    }

    fn disarm(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, Lifecycle::Stopped) {
            Lifecycle::Running { cancel, timer } => {
                cancel.cancel();
                info!("retention sweeper stopped");
                self.inner.events.publish(SweepEvent::Stopped);
                Some(timer)
            }
            other => {
                *state = other;
                None
            }
        }
    }

    /// Run every cleanup task concurrently and wait for all of them. Task
    /// failures are isolated, logged and reported; this never fails.
    pub async fn run_full_sweep(&self) -> SweepReport {
        self.inner.run_full_sweep().await
    }

    /// Delete a club's chat messages, approval requests and participants.
    pub async fn run_club_scoped_cleanup(&self, club_id: &str) -> SweepReport {
        self.inner.run_club_scoped_cleanup(club_id).await
    }

    /// Run one task on its own, returning how many items it cleaned.
    pub async fn run_task(&self, kind: TaskKind) -> SweepResult<u64> {
        let config = &self.inner.config;
        let runner = TaskRunner::new(self.inner.store.as_ref(), config, OffsetDateTime::now_utc());
        let mut progress = TaskProgress::default();
        runner.run(kind, &mut progress).await?;
        Ok(progress.cleaned)
    }

    /// Count documents each age-based policy would clean right now.
    ///
    /// Counts match what the next sweep removes when nothing is written in
    /// between. A message that has expired is counted once, under
    /// `expired_messages`, even if it also carries old reactions.
    pub async fn statistics(&self) -> SweepResult<Statistics> {
        let runner = TaskRunner::new(
            self.inner.store.as_ref(),
            &self.inner.config,
            OffsetDateTime::now_utc(),
        );
        let mut stats = Statistics::new();
        for kind in TaskKind::AGE_BASED {
            if let Some(count) = runner.count_eligible(kind).await? {
                stats.insert(kind, count);
            }
        }
        Ok(stats)
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Lifecycle::Running { cancel, .. } = &*self.state.lock() {
            cancel.cancel();
        }
    }
}

impl Inner {
    async fn run_full_sweep(self: &Arc<Self>) -> SweepReport {
        let now = OffsetDateTime::now_utc();
        let sweep = self.begin(SweepScope::Full, now);
        let mut set = JoinSet::new();
        let mut slots = HashMap::new();
        for (index, kind) in TaskKind::ALL.into_iter().enumerate() {
            let inner = self.clone();
            let handle = set.spawn(async move {
                let runner = TaskRunner::new(inner.store.as_ref(), &inner.config, now);
                let mut progress = TaskProgress::default();
                let result = runner.run(kind, &mut progress).await;
                (index, TaskOutcome::from_result(progress, result))
            });
            slots.insert(handle.id(), index);
        }
        self.fan_in(sweep, &TaskKind::ALL.map(TaskKind::name), set, slots)
            .await
    }

    async fn run_club_scoped_cleanup(self: &Arc<Self>, club_id: &str) -> SweepReport {
        let now = OffsetDateTime::now_utc();
        let scope = SweepScope::Club {
            club_id: club_id.to_string(),
        };
        let sweep = self.begin(scope, now);
        let mut set = JoinSet::new();
        let mut slots = HashMap::new();
        for (index, task) in ClubTask::ALL.into_iter().enumerate() {
            let inner = self.clone();
            let club_id = club_id.to_string();
            let handle = set.spawn(async move {
                let runner = TaskRunner::new(inner.store.as_ref(), &inner.config, now);
                let mut progress = TaskProgress::default();
                let result = runner.run_club(task, &club_id, &mut progress).await;
                (index, TaskOutcome::from_result(progress, result))
            });
            slots.insert(handle.id(), index);
        }
        self.fan_in(sweep, &ClubTask::ALL.map(ClubTask::name), set, slots)
            .await
    }

    fn begin(&self, scope: SweepScope, started_at: OffsetDateTime) -> SweepStart {
        let sweep_id = Uuid::new_v4();
        info!(%sweep_id, ?scope, "sweep started");
        self.events.publish(SweepEvent::Started {
            sweep_id,
            scope: scope.clone(),
        });
        SweepStart {
            sweep_id,
            scope,
            started_at,
            clock: Instant::now(),
        }
    }

    /// Wait for every spawned task. A panicking task becomes a failed report
    /// instead of tearing down the sweep.
    async fn fan_in(
        &self,
        sweep: SweepStart,
        names: &[&'static str],
        mut set: JoinSet<(usize, TaskOutcome)>,
        slots: HashMap<task::Id, usize>,
    ) -> SweepReport {
        let SweepStart {
            sweep_id,
            scope,
            started_at,
            clock,
        } = sweep;
        let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; names.len()];
        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(err) => match slots.get(&err.id()) {
                    Some(&index) => (index, join_failure(err)),
                    None => continue,
                },
            };
            let report = TaskReport {
                task: names[index],
                outcome,
                elapsed_ms: clock.elapsed().as_millis() as u64,
            };
            log::task_report(&report);
            self.events.publish(SweepEvent::TaskFinished {
                sweep_id,
                report: report.clone(),
            });
            outcomes[index] = Some(report.outcome);
        }

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        let tasks = names
            .iter()
            .zip(outcomes)
            .map(|(&task, outcome)| TaskReport {
                task,
                outcome: outcome.unwrap_or_else(|| {
                    TaskOutcome::from_result(
                        TaskProgress::default(),
                        Err(SweepError::Panicked("task did not report".into())),
                    )
                }),
                elapsed_ms,
            })
            .collect();
        let report = SweepReport {
            sweep_id,
            scope,
            started_at: unix_millis(started_at),
            elapsed_ms,
            tasks,
        };
        info!(
            %sweep_id,
            cleaned = report.total_cleaned(),
            failed = report.failures().count(),
            elapsed_ms,
            "sweep finished"
        );
        self.events.publish(SweepEvent::Finished(report.clone()));
        report
    }
}

struct SweepStart {
    sweep_id: Uuid,
    scope: SweepScope,
    started_at: OffsetDateTime,
    clock: Instant,
}

fn join_failure(err: JoinError) -> TaskOutcome {
    let message = match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into()),
        Err(err) => err.to_string(),
    };
    TaskOutcome::from_result(TaskProgress::default(), Err(SweepError::Panicked(message)))
}
