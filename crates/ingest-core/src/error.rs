use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Short stable code, logged as the `code` field when config loading fails.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Config(_) => "CONFIG_ERROR",
            IngestError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
