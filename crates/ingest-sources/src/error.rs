use thiserror::Error;

/// Errors raised while obtaining records for a job.
#[derive(Debug, Error)]
pub enum FetchError {
    /// `args.source` names a source that is not registered.
    #[error("Unknown data source: {name}")]
    UnknownSource { name: String },

    /// The job has no `args.source`.
    #[error("Job arguments do not name a data source")]
    MissingSource,

    /// The job arguments are not usable by this source.
    #[error("Invalid source arguments: {0}")]
    InvalidArgs(String),

    /// The source itself reported a failure.
    #[error("Source failed: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed source data: {0}")]
    Parse(#[from] serde_json::Error),
}
