use ingest_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job's trigger names a kind the scheduler does not know.
    #[error("Job '{job}': unknown trigger kind '{kind}'")]
    UnknownTriggerKind { job: String, kind: String },

    /// A job's trigger has the right kind but unusable fields.
    #[error("Job '{job}': invalid trigger: {reason}")]
    InvalidTrigger { job: String, reason: String },

    /// A schedule entry is not a usable job definition.
    #[error("Invalid job definition at index {index}: {reason}")]
    InvalidJob { index: usize, reason: String },

    /// Two schedule entries share a name.
    #[error("Duplicate job name: {name}")]
    DuplicateJob { name: String },

    /// The schedule document as a whole could not be read.
    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// True when the store could not be reached; the iteration stops and retries next poll.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.is_unavailable())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
