use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Fetch failed, a record failed to persist, or the run was interrupted.
    Failure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// The trigger evaluator found the job due.
    Scheduled,
    /// One-shot mode ran the job regardless of due-ness.
    Forced,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Forced => "forced",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunTrigger::Scheduled),
            "forced" => Ok(RunTrigger::Forced),
            other => Err(format!("unknown run trigger: {other}")),
        }
    }
}

/// One row of `ingestion_history`. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Row id, `None` until appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// UUIDv7 of the attempt — time-sortable.
    pub run_id: String,
    pub job_name: String,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub run_started_at: DateTime<Utc>,
    pub run_finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Records applied to the entity store (no-ops included).
    pub records_processed: u64,
    /// New SCD2 versions opened by this run.
    pub versions_created: u64,
    pub error_detail: Option<String>,
}

/// One SCD2 version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub id: i64,
    /// Dataset the entity belongs to (e.g. `"transactions"`).
    pub entity: String,
    pub business_key: String,
    pub payload: serde_json::Value,
    /// Hex SHA-256 of the canonical payload.
    pub row_hash: String,
    pub valid_from: DateTime<Utc>,
    /// `None` while this is the current version.
    pub valid_to: Option<DateTime<Utc>>,
    pub is_current: bool,
}

/// What an upsert did to the key's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting of the key; a current version was opened.
    Inserted,
    /// Payload matched the current version; nothing written.
    Unchanged,
    /// The previous current version was closed and a new one opened.
    Superseded,
}

impl UpsertOutcome {
    /// Whether a new version row was written.
    pub fn created_version(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}
