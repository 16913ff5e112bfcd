use std::collections::HashSet;
use std::path::Path;

use ingest_core::{JobArgs, JobDefinition, Trigger};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::trigger::MAX_INTERVAL_SECS;

const TRIGGER_KINDS: [&str; 3] = ["interval", "daily", "weekly"];

/// Outcome of loading a schedule: the usable jobs plus one error per rejected entry.
#[derive(Debug, Default)]
pub struct LoadedSchedule {
    pub jobs: Vec<JobDefinition>,
    pub rejected: Vec<SchedulerError>,
}

/// Read and parse a schedule file. See [`parse_schedule`].
pub fn load_schedule(path: impl AsRef<Path>) -> Result<LoadedSchedule> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SchedulerError::Schedule(format!("{}: {e}", path.display())))?;
    let loaded = parse_schedule(&raw)?;
    info!(
        path = %path.display(),
        jobs = loaded.jobs.len(),
        rejected = loaded.rejected.len(),
        "schedule loaded"
    );
    Ok(loaded)
}

/// Parse a schedule document: `{"jobs": [...]}` or a bare array of jobs.
///
/// Entries are validated one by one. A bad entry (unknown trigger kind,
/// malformed fields, repeated name) is reported in
/// [`LoadedSchedule::rejected`] and does not affect the others. Only a
/// document that is not JSON or has no job list fails as a whole.
pub fn parse_schedule(raw: &str) -> Result<LoadedSchedule> {
    let doc: Value = serde_json::from_str(raw)
        .map_err(|e| SchedulerError::Schedule(format!("invalid JSON: {e}")))?;
    let entries = match doc {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("jobs") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(SchedulerError::Schedule(
                    "schedule must contain a 'jobs' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(SchedulerError::Schedule(
                "schedule must be an object or an array".to_string(),
            ))
        }
    };

    let mut loaded = LoadedSchedule::default();
    let mut seen = HashSet::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_job(index, entry) {
            Ok(job) if !seen.insert(job.name.clone()) => {
                let err = SchedulerError::DuplicateJob { name: job.name };
                warn!(error = %err, "job rejected");
                loaded.rejected.push(err);
            }
            Ok(job) => loaded.jobs.push(job),
            Err(err) => {
                warn!(error = %err, "job rejected");
                loaded.rejected.push(err);
            }
        }
    }
    Ok(loaded)
}

fn parse_job(index: usize, entry: Value) -> Result<JobDefinition> {
    let Value::Object(mut map) = entry else {
        return Err(SchedulerError::InvalidJob {
            index,
            reason: "entry is not an object".to_string(),
        });
    };

    let name = match map.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => {
            return Err(SchedulerError::InvalidJob {
                index,
                reason: "missing or empty 'name'".to_string(),
            })
        }
    };

    let args: JobArgs = match map.remove("args") {
        None | Some(Value::Null) => JobArgs::new(),
        Some(Value::Object(args)) => args,
        Some(_) => {
            return Err(SchedulerError::InvalidJob {
                index,
                reason: format!("job '{name}': 'args' must be an object"),
            })
        }
    };

    let trigger = parse_trigger(&name, map.remove("trigger"))?;
    Ok(JobDefinition::new(name, trigger, args))
}

fn parse_trigger(job: &str, raw: Option<Value>) -> Result<Trigger> {
    let invalid = |reason: String| SchedulerError::InvalidTrigger {
        job: job.to_string(),
        reason,
    };

    let raw = raw.ok_or_else(|| invalid("missing 'trigger'".to_string()))?;
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("trigger has no 'type'".to_string()))?;
    if !TRIGGER_KINDS.contains(&kind) {
        return Err(SchedulerError::UnknownTriggerKind {
            job: job.to_string(),
            kind: kind.to_string(),
        });
    }

    let trigger: Trigger = serde_json::from_value(raw).map_err(|e| invalid(e.to_string()))?;
    if let Trigger::Interval { seconds } = trigger {
        if seconds == 0 || seconds > MAX_INTERVAL_SECS {
            return Err(invalid(format!(
                "interval seconds must be between 1 and {MAX_INTERVAL_SECS}, got {seconds}"
            )));
        }
    }
    Ok(trigger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use std::io::Write;

    const SCHEDULE: &str = r#"{
        "jobs": [
            {"name": "fetch_transactions",
             "trigger": {"type": "interval", "seconds": 1},
             "args": {"source": "mock", "limit": 3}},
            {"name": "nightly",
             "trigger": {"type": "daily", "time": "02:30"},
             "args": {"source": "mock"}},
            {"name": "weekly_report",
             "trigger": {"type": "weekly", "weekday": "friday", "time": "18:00:00"}}
        ]
    }"#;

    #[test]
    fn parses_all_trigger_kinds() {
        let loaded = parse_schedule(SCHEDULE).unwrap();
        assert!(loaded.rejected.is_empty());
        assert_eq!(loaded.jobs.len(), 3);
        assert_eq!(loaded.jobs[0].trigger, Trigger::Interval { seconds: 1 });
        assert_eq!(loaded.jobs[0].args["limit"], serde_json::json!(3));
        assert_eq!(
            loaded.jobs[1].trigger,
            Trigger::Daily {
                time: NaiveTime::from_hms_opt(2, 30, 0).unwrap()
            }
        );
        assert_eq!(
            loaded.jobs[2].trigger,
            Trigger::Weekly {
                weekday: Weekday::Fri,
                time: NaiveTime::from_hms_opt(18, 0, 0).unwrap()
            }
        );
        assert!(loaded.jobs[2].args.is_empty());
    }

    #[test]
    fn unknown_trigger_kind_only_rejects_that_job() {
        let loaded = parse_schedule(
            r#"[
                {"name": "a", "trigger": {"type": "cron", "expression": "* * * * *"}},
                {"name": "b", "trigger": {"type": "interval", "seconds": 60}}
            ]"#,
        )
        .unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].name, "b");
        assert!(matches!(
            &loaded.rejected[..],
            [SchedulerError::UnknownTriggerKind { job, kind }] if job == "a" && kind == "cron"
        ));
    }

    #[test]
    fn malformed_fields_are_invalid_trigger() {
        let loaded = parse_schedule(
            r#"[
                {"name": "zero", "trigger": {"type": "interval", "seconds": 0}},
                {"name": "bad_time", "trigger": {"type": "daily", "time": "9am"}},
                {"name": "no_day", "trigger": {"type": "weekly", "time": "09:00"}}
            ]"#,
        )
        .unwrap();
        assert!(loaded.jobs.is_empty());
        assert_eq!(loaded.rejected.len(), 3);
        assert!(loaded
            .rejected
            .iter()
            .all(|e| matches!(e, SchedulerError::InvalidTrigger { .. })));
    }

    #[test]
    fn duplicate_names_keep_the_first() {
        let loaded = parse_schedule(
            r#"[
                {"name": "a", "trigger": {"type": "interval", "seconds": 5}},
                {"name": "a", "trigger": {"type": "interval", "seconds": 10}}
            ]"#,
        )
        .unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].trigger, Trigger::Interval { seconds: 5 });
        assert!(matches!(&loaded.rejected[..], [SchedulerError::DuplicateJob { name }] if name == "a"));
    }

    #[test]
    fn entries_without_name_are_rejected() {
        let loaded =
            parse_schedule(r#"[{"trigger": {"type": "interval", "seconds": 5}}, 7]"#).unwrap();
        assert!(loaded.jobs.is_empty());
        assert!(matches!(
            &loaded.rejected[..],
            [
                SchedulerError::InvalidJob { index: 0, .. },
                SchedulerError::InvalidJob { index: 1, .. }
            ]
        ));
    }

    #[test]
    fn document_without_jobs_fails() {
        assert!(matches!(
            parse_schedule(r#"{"tasks": []}"#),
            Err(SchedulerError::Schedule(_))
        ));
        assert!(parse_schedule("not json").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCHEDULE.as_bytes()).unwrap();
        let loaded = load_schedule(file.path()).unwrap();
        assert_eq!(loaded.jobs.len(), 3);
    }
}
