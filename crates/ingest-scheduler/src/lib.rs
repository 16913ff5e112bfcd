//! `ingest-scheduler` — trigger evaluation, job execution and the scheduler loop.
//!
//! # Trigger variants
//!
//! | Variant    | Due when                                                         |
//! |------------|------------------------------------------------------------------|
//! | `Interval` | never run, or `seconds` elapsed since the last run               |
//! | `Daily`    | today's `time` (UTC) reached, and no run since then              |
//! | `Weekly`   | as `Daily`, and today is `weekday`                               |
//!
//! # Modes
//!
//! [`engine::SchedulerEngine::run_once`] executes every job once regardless of
//! due-ness. [`engine::SchedulerEngine::run_forever`] evaluates all jobs every
//! period and executes the due ones, sequentially in list order or
//! concurrently when enabled.

pub mod engine;
pub mod error;
pub mod executor;
pub mod loader;
pub mod state;
pub mod trigger;

pub use engine::{IterationReport, SchedulerEngine, SchedulerOptions};
pub use error::{Result, SchedulerError};
pub use executor::{ExecutionResult, JobExecutor};
pub use loader::{load_schedule, parse_schedule, LoadedSchedule};
pub use state::{InFlightGuard, RunState};
pub use trigger::{is_due, next_eligible};
