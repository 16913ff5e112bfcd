//! `ingest-core` — shared model for the ingestion manager.
//!
//! Holds the job definition and trigger types consumed by the scheduler, the
//! [`clock::Clock`] abstraction used for every "now" decision, the figment
//! based configuration and the top-level error type.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{IngestError, Result};
pub use types::{JobArgs, JobDefinition, RawRecord, Trigger};
