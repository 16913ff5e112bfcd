use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ingest_core::config::{SchedulerConfig, DEFAULT_MAX_CONCURRENT};
use ingest_core::{Clock, JobDefinition};
use ingest_store::RunTrigger;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    executor::{ExecutionResult, JobExecutor},
    state::RunState,
    trigger::{is_due, next_eligible},
};

/// Shortest poll period accepted by [`SchedulerEngine::run_forever`].
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// How due jobs of one iteration are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Run due jobs as concurrent tasks instead of one after another.
    pub concurrent: bool,
    /// Cap on simultaneously executing jobs in concurrent mode.
    pub max_concurrent: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrent: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            concurrent: config.concurrent,
            max_concurrent: config.max_concurrent,
        }
    }
}

/// What a single pass over the job list did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// Jobs started (sequential mode) or handed to a task (concurrent mode).
    pub dispatched: Vec<String>,
    /// Due jobs whose previous execution had not finished yet.
    pub skipped_in_flight: Vec<String>,
    /// Sequential mode stopped early because the store was unreachable.
    pub aborted: bool,
}

/// Drives trigger evaluation and job dispatch.
pub struct SchedulerEngine {
    jobs: Vec<Arc<JobDefinition>>,
    executor: Arc<JobExecutor>,
    state: Arc<RunState>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    shutdown: watch::Receiver<bool>,
}

impl SchedulerEngine {
    pub fn new(
        jobs: Vec<JobDefinition>,
        executor: JobExecutor,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        // Replaced by the caller's signal in `run_forever`.
        let (_, shutdown) = watch::channel(false);
        Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            executor: Arc::new(executor),
            state: Arc::new(RunState::new()),
            clock,
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            options,
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    /// Replace the run state, e.g. with one restored from history.
    pub fn with_run_state(mut self, state: RunState) -> Self {
        self.state = Arc::new(state);
        self
    }

    /// Seed each job's last run time from the history table.
    pub fn restore_run_state(&mut self) -> Result<()> {
        let last_runs = self.executor.history().last_runs()?;
        info!(jobs = last_runs.len(), "run state restored from history");
        self.state = Arc::new(RunState::restore(last_runs));
        Ok(())
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Execute every job once, due or not, and wait for all of them.
    pub async fn run_once(&mut self) -> IterationReport {
        info!(jobs = self.jobs.len(), concurrent = self.options.concurrent, "one-shot run");
        let report = self.iterate(RunTrigger::Forced).await;
        self.drain().await;
        report
    }

    /// One poll iteration: execute the jobs that are due now.
    ///
    /// In concurrent mode this returns once the due jobs are dispatched;
    /// they finish in the background.
    pub async fn tick(&mut self) -> IterationReport {
        self.iterate(RunTrigger::Scheduled).await
    }

    /// Poll every `period` until `shutdown` broadcasts `true`.
    ///
    /// The period runs from iteration start to iteration start. Ticks missed
    /// while an iteration overran are skipped rather than replayed. On
    /// shutdown, running executions stop after their current record and are
    /// awaited before returning.
    pub async fn run_forever(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let period = period.max(MIN_PERIOD);
        info!(
            period_ms = period.as_millis() as u64,
            jobs = self.jobs.len(),
            concurrent = self.options.concurrent,
            "scheduler engine started"
        );
        self.shutdown = shutdown.clone();

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if !report.dispatched.is_empty() || !report.skipped_in_flight.is_empty() {
                        debug!(
                            dispatched = report.dispatched.len(),
                            skipped = report.skipped_in_flight.len(),
                            aborted = report.aborted,
                            "iteration complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        self.drain().await;
        info!("scheduler engine stopped");
    }

    /// Wait for every background execution to finish.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("job task failed: {e}");
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    async fn iterate(&mut self, trigger: RunTrigger) -> IterationReport {
        self.reap();
        let now = self.clock.now();
        let storage_down = Arc::new(AtomicBool::new(false));
        let mut report = IterationReport::default();

        for job in self.jobs.clone() {
            if trigger == RunTrigger::Scheduled
                && !is_due(&job.trigger, self.state.last_run_at(&job.name), now)
            {
                continue;
            }
            let Some(guard) = self.state.try_begin(&job.name) else {
                warn!(job = %job.name, "previous run still in flight, skipping");
                report.skipped_in_flight.push(job.name.clone());
                continue;
            };
            report.dispatched.push(job.name.clone());

            if self.options.concurrent {
                let executor = Arc::clone(&self.executor);
                let state = Arc::clone(&self.state);
                let permits = Arc::clone(&self.permits);
                let storage_down = Arc::clone(&storage_down);
                let shutdown = self.shutdown.clone();
                self.tasks.spawn(async move {
                    let _guard = guard;
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    if storage_down.load(Ordering::Acquire) {
                        warn!(job = %job.name, "storage unavailable, run deferred to next iteration");
                        return;
                    }
                    let outcome = executor.execute(&job, trigger, &shutdown).await;
                    if settle(&state, &job, outcome) {
                        storage_down.store(true, Ordering::Release);
                    }
                });
            } else {
                let outcome = self.executor.execute(&job, trigger, &self.shutdown).await;
                let unavailable = settle(&self.state, &job, outcome);
                drop(guard);
                if unavailable {
                    error!("storage unavailable, remaining jobs deferred to next iteration");
                    report.aborted = true;
                    break;
                }
            }
        }
        report
    }

    /// Collect finished background tasks without waiting.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                error!("job task failed: {e}");
            }
        }
    }
}

/// Fold an execution outcome into run state. Returns true when the store was unreachable.
///
/// A recorded attempt, failed or not, moves `last_run_at` so a broken source
/// is not retried on every poll. An attempt that could not be recorded leaves
/// run state untouched and is retried next iteration.
fn settle(state: &RunState, job: &JobDefinition, outcome: Result<ExecutionResult>) -> bool {
    match outcome {
        Ok(result) => {
            state.record_completion(&job.name, result.started_at);
            debug!(
                job = %job.name,
                next = %next_eligible(&job.trigger, result.started_at),
                "next eligible"
            );
            result.storage_unavailable
        }
        Err(e) => {
            error!(job = %job.name, error = %e, "run could not be recorded");
            e.is_storage_unavailable()
        }
    }
}
