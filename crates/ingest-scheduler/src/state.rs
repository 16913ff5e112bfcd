use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

/// Per-job run state owned by the scheduler loop.
///
/// `last_run_at` is written only once an execution outcome is known, never at
/// dispatch. The in-flight set keeps a job from being started again while a
/// previous execution of it is still running.
#[derive(Debug, Default)]
pub struct RunState {
    last_run: DashMap<String, DateTime<Utc>>,
    in_flight: DashSet<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted history (job name → latest run start).
    pub fn restore(last_runs: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            last_run: last_runs.into_iter().collect(),
            in_flight: DashSet::new(),
        }
    }

    pub fn last_run_at(&self, job: &str) -> Option<DateTime<Utc>> {
        self.last_run.get(job).map(|at| *at)
    }

    /// Record that an execution of `job` started at `at` has finished.
    pub fn record_completion(&self, job: &str, at: DateTime<Utc>) {
        self.last_run
            .entry(job.to_string())
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    pub fn is_in_flight(&self, job: &str) -> bool {
        self.in_flight.contains(job)
    }

    /// Mark `job` as executing. Returns `None` if it already is.
    pub fn try_begin(self: &Arc<Self>, job: &str) -> Option<InFlightGuard> {
        if self.in_flight.insert(job.to_string()) {
            Some(InFlightGuard {
                state: Arc::clone(self),
                job: job.to_string(),
            })
        } else {
            None
        }
    }
}

/// Clears the job's in-flight mark when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    state: Arc<RunState>,
    job: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.remove(&self.job);
    }
}
