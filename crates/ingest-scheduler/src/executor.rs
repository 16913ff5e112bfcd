use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ingest_core::{Clock, JobDefinition};
use ingest_sources::{FetchError, SourceRegistry};
use ingest_store::record::{split_record, RawRecord};
use ingest_store::{HistoryRecord, HistoryStore, RunStatus, RunTrigger, Scd2Store, StoreError};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Summary of one execution attempt, as written to the history table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records applied before the run finished or stopped.
    pub records_processed: u64,
    pub versions_created: u64,
    pub error: Option<String>,
    /// A record write found the store unreachable; the caller should stop
    /// dispatching for this iteration.
    pub storage_unavailable: bool,
}

/// Why a run stopped early.
enum Failure {
    Fetch(FetchError),
    Persist(StoreError),
    Interrupted,
}

/// Record-level tally of a run.
struct Ingested {
    processed: u64,
    created: u64,
    failure: Option<Failure>,
}

/// Runs a job: fetch, SCD2 upsert per record, one history row per attempt.
pub struct JobExecutor {
    sources: SourceRegistry,
    versions: Arc<Scd2Store>,
    history: Arc<HistoryStore>,
    clock: Arc<dyn Clock>,
}

impl JobExecutor {
    pub fn new(
        sources: SourceRegistry,
        versions: Arc<Scd2Store>,
        history: Arc<HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            versions,
            history,
            clock,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn versions(&self) -> &Scd2Store {
        &self.versions
    }

    /// Execute `job` once and record the attempt.
    ///
    /// Fetch and per-record failures are captured in the returned
    /// [`ExecutionResult`]; the first failing record stops the run. `shutdown`
    /// is checked between records, so an interrupted run never leaves a
    /// version swap half applied. `Err` means the attempt could not be
    /// written to the history table.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        trigger: RunTrigger,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        let run_id = Uuid::now_v7().to_string();
        let started_at = self.clock.now();
        let timer = Instant::now();
        info!(job = %job.name, %run_id, %trigger, "job started");

        let ingested = self.ingest(job, shutdown).await;

        let finished_at = self.clock.now();
        let (status, error, storage_unavailable) = match &ingested.failure {
            None => (RunStatus::Success, None, false),
            Some(Failure::Fetch(e)) => (RunStatus::Failure, Some(format!("fetch failed: {e}")), false),
            Some(Failure::Persist(e)) => (
                RunStatus::Failure,
                Some(format!(
                    "persistence failed after {} records: {e}",
                    ingested.processed
                )),
                e.is_unavailable(),
            ),
            Some(Failure::Interrupted) => (
                RunStatus::Failure,
                Some(format!("interrupted after {} records", ingested.processed)),
                false,
            ),
        };

        let record = HistoryRecord {
            id: None,
            run_id: run_id.clone(),
            job_name: job.name.clone(),
            trigger,
            status,
            run_started_at: started_at,
            run_finished_at: finished_at,
            duration_ms: timer.elapsed().as_millis() as i64,
            records_processed: ingested.processed,
            versions_created: ingested.created,
            error_detail: error.clone(),
        };
        self.history.append(&record)?;

        match &error {
            None => info!(
                job = %job.name,
                %run_id,
                records = ingested.processed,
                versions = ingested.created,
                "job finished"
            ),
            Some(detail) => warn!(
                job = %job.name,
                %run_id,
                records = ingested.processed,
                versions = ingested.created,
                error = %detail,
                "job failed"
            ),
        }

        Ok(ExecutionResult {
            run_id,
            status,
            started_at,
            finished_at,
            records_processed: ingested.processed,
            versions_created: ingested.created,
            error,
            storage_unavailable,
        })
    }

    async fn ingest(&self, job: &JobDefinition, shutdown: &watch::Receiver<bool>) -> Ingested {
        let mut ingested = Ingested {
            processed: 0,
            created: 0,
            failure: None,
        };

        let (records, key_fields) = match self.fetch(job).await {
            Ok(fetched) => fetched,
            Err(e) => {
                ingested.failure = Some(Failure::Fetch(e));
                return ingested;
            }
        };
        let attribute_fields = job.attribute_fields();
        let entity = job.entity();

        for record in &records {
            if *shutdown.borrow() {
                ingested.failure = Some(Failure::Interrupted);
                break;
            }
            match self.apply(entity, record, &key_fields, attribute_fields.as_deref()) {
                Ok(created) => {
                    ingested.processed += 1;
                    ingested.created += u64::from(created);
                }
                Err(e) => {
                    ingested.failure = Some(Failure::Persist(e));
                    break;
                }
            }
        }
        ingested
    }

    /// Resolve the job's source, fetch, and settle the business key fields.
    async fn fetch(
        &self,
        job: &JobDefinition,
    ) -> std::result::Result<(Vec<RawRecord>, Vec<String>), FetchError> {
        let name = job.source().ok_or(FetchError::MissingSource)?;
        let source = self.sources.get(name)?;
        let key_fields = job
            .key_fields()
            .unwrap_or_else(|| source.default_key_fields());
        let records = source.fetch(&job.args).await?;
        Ok((records, key_fields))
    }

    /// Upsert one record; returns whether a new version was opened.
    fn apply(
        &self,
        entity: &str,
        record: &RawRecord,
        key_fields: &[String],
        attribute_fields: Option<&[String]>,
    ) -> std::result::Result<bool, StoreError> {
        let (business_key, payload) = split_record(record, key_fields, attribute_fields)?;
        let outcome =
            self.versions
                .upsert_now(entity, &business_key, &payload, self.clock.as_ref())?;
        Ok(outcome.created_version())
    }
}
