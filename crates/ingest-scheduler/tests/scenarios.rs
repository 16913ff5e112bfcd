// End-to-end runs against an on-disk store: schedule text in, history rows
// and entity versions out.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use ingest_core::ManualClock;
use ingest_scheduler::{parse_schedule, JobExecutor, SchedulerEngine, SchedulerOptions};
use ingest_sources::SourceRegistry;
use ingest_store::{db, HistoryStore, RunStatus, RunTrigger, Scd2Store};
use serde_json::json;
use tempfile::TempDir;

fn engine_for(db_path: &Path, schedule: &str, clock: Arc<ManualClock>) -> SchedulerEngine {
    let loaded = parse_schedule(schedule).unwrap();
    assert!(loaded.rejected.is_empty(), "rejected: {:?}", loaded.rejected);
    let executor = JobExecutor::new(
        SourceRegistry::with_builtins(),
        Arc::new(Scd2Store::new(db::open(db_path).unwrap()).unwrap()),
        Arc::new(HistoryStore::new(db::open(db_path).unwrap()).unwrap()),
        clock.clone(),
    );
    SchedulerEngine::new(loaded.jobs, executor, clock, SchedulerOptions::default())
}

fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap(),
    ))
}

const MOCK_SCHEDULE: &str = r#"{
    "jobs": [
        {
            "name": "mock_tx",
            "trigger": {"type": "interval", "seconds": 1},
            "args": {"source": "mock", "limit": 3}
        }
    ]
}"#;

#[tokio::test]
async fn once_with_mock_source_records_one_success() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ingest.db");
    let mut engine = engine_for(&path, MOCK_SCHEDULE, start_clock());

    engine.run_once().await;

    let rows = engine.executor().history().recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_name, "mock_tx");
    assert_eq!(rows[0].status, RunStatus::Success);
    assert_eq!(rows[0].trigger, RunTrigger::Forced);
    assert_eq!(rows[0].records_processed, 3);
    assert_eq!(rows[0].versions_created, 3);
    assert!(rows[0].error_detail.is_none());
    assert_eq!(engine.executor().versions().count_current("mock_tx").unwrap(), 3);
}

#[tokio::test]
async fn identical_rerun_adds_history_but_no_versions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ingest.db");
    let clock = start_clock();
    let mut engine = engine_for(&path, MOCK_SCHEDULE, clock.clone());

    engine.run_once().await;
    clock.advance(Duration::seconds(30));
    engine.run_once().await;

    let rows = engine.executor().history().for_job("mock_tx").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == RunStatus::Success));
    assert_eq!(rows[1].records_processed, 3);
    assert_eq!(rows[1].versions_created, 0);
    for key in [r#"["mock-0"]"#, r#"["mock-1"]"#, r#"["mock-2"]"#] {
        assert_eq!(engine.executor().versions().count_versions("mock_tx", key).unwrap(), 1);
    }
}

#[tokio::test]
async fn changed_record_closes_and_opens_one_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ingest.db");
    let feed = dir.path().join("accounts.json");
    std::fs::write(
        &feed,
        json!([
            {"id": "a", "balance": 10},
            {"id": "b", "balance": 20},
        ])
        .to_string(),
    )
    .unwrap();

    let schedule = json!({
        "jobs": [{
            "name": "accounts",
            "trigger": {"type": "daily", "time": "06:00"},
            "args": {"source": "file", "path": feed.to_string_lossy()}
        }]
    })
    .to_string();
    let clock = start_clock();
    let mut engine = engine_for(&path, &schedule, clock.clone());

    engine.run_once().await;
    std::fs::write(
        &feed,
        json!([
            {"id": "a", "balance": 10},
            {"id": "b", "balance": 25},
        ])
        .to_string(),
    )
    .unwrap();
    clock.advance(Duration::hours(1));
    engine.run_once().await;

    let versions = engine.executor().versions();
    assert_eq!(versions.count_versions("accounts", r#"["a"]"#).unwrap(), 1);
    assert_eq!(versions.count_versions("accounts", r#"["b"]"#).unwrap(), 2);

    let timeline = versions.history("accounts", r#"["b"]"#).unwrap();
    assert_eq!(timeline[0].valid_to, Some(timeline[1].valid_from));
    assert!(!timeline[0].is_current);
    assert!(timeline[1].is_current);
    assert_eq!(timeline[1].payload["balance"], json!(25));

    let runs = engine.executor().history().for_job("accounts").unwrap();
    assert_eq!(runs[1].versions_created, 1);
}

#[tokio::test]
async fn run_state_survives_restart_through_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ingest.db");
    let clock = start_clock();

    let schedule = r#"[{"name": "hourly", "trigger": {"type": "interval", "seconds": 3600},
                        "args": {"source": "mock", "limit": 1}}]"#;
    let mut first = engine_for(&path, schedule, clock.clone());
    assert_eq!(first.tick().await.dispatched.len(), 1);
    drop(first);

    clock.advance(Duration::minutes(10));
    let mut second = engine_for(&path, schedule, clock.clone());
    second.restore_run_state().unwrap();
    assert!(second.tick().await.dispatched.is_empty());

    clock.advance(Duration::minutes(50));
    assert_eq!(second.tick().await.dispatched.len(), 1);
    assert_eq!(second.executor().history().for_job("hourly").unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_jobs_are_skipped_and_valid_ones_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ingest.db");
    let schedule = r#"[
        {"name": "bad", "trigger": {"type": "cron", "expr": "* * * * *"}},
        {"name": "good", "trigger": {"type": "interval", "seconds": 60},
         "args": {"source": "mock", "limit": 2}}
    ]"#;

    let loaded = parse_schedule(schedule).unwrap();
    assert_eq!(loaded.jobs.len(), 1);
    assert_eq!(loaded.rejected.len(), 1);

    let clock = start_clock();
    let executor = JobExecutor::new(
        SourceRegistry::with_builtins(),
        Arc::new(Scd2Store::new(db::open(&path).unwrap()).unwrap()),
        Arc::new(HistoryStore::new(db::open(&path).unwrap()).unwrap()),
        clock.clone(),
    );
    let mut engine = SchedulerEngine::new(loaded.jobs, executor, clock, SchedulerOptions::default());
    engine.run_once().await;

    let rows = engine.executor().history().recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_name, "good");
}
