//! `ingest-store` — SQLite persistence for ingestion runs.
//!
//! Two tables live in the same database file:
//!
//! | Table               | Owner                       | Write pattern                    |
//! |---------------------|-----------------------------|----------------------------------|
//! | `ingestion_history` | [`history::HistoryStore`]   | append-only, one row per attempt |
//! | `entity_versions`   | [`scd2::Scd2Store`]         | SCD Type 2 close-and-insert      |
//!
//! A partial unique index on `(entity, business_key) WHERE is_current = 1`
//! backs the "exactly one current version per key" invariant at the
//! database level.

pub mod db;
pub mod error;
pub mod history;
pub mod record;
pub mod scd2;
pub mod types;

pub use error::{Result, StoreError};
pub use history::HistoryStore;
pub use scd2::Scd2Store;
pub use types::{EntityVersion, HistoryRecord, RunStatus, RunTrigger, UpsertOutcome};
