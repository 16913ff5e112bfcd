use async_trait::async_trait;
use ingest_core::{JobArgs, RawRecord};

use crate::error::FetchError;

/// Capability every data source implements.
///
/// One `fetch` call corresponds to one ingestion run and returns a finite
/// batch of records.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Registry name (e.g. `"mock"`). Must be unique within a registry.
    fn name(&self) -> &str;

    /// Business key fields used when the job does not set `args.key_fields`.
    fn default_key_fields(&self) -> Vec<String>;

    /// Produce the records for one run.
    async fn fetch(&self, args: &JobArgs) -> Result<Vec<RawRecord>, FetchError>;
}
