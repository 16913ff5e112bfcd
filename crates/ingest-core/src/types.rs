use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque argument bag forwarded to the data source of a job.
pub type JobArgs = serde_json::Map<String, Value>;

/// One record as produced by a data source, before key extraction.
pub type RawRecord = serde_json::Map<String, Value>;

/// Defines when a job becomes due. All times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Due once `seconds` have elapsed since the previous run.
    Interval { seconds: u64 },

    /// Due once per day after `time` has been crossed.
    Daily {
        #[serde(with = "time_of_day")]
        time: NaiveTime,
    },

    /// Due once per week on `weekday` after `time` has been crossed.
    Weekly {
        weekday: Weekday,
        #[serde(with = "time_of_day")]
        time: NaiveTime,
    },
}

/// `"HH:MM"` or `"HH:MM:SS"` in the schedule file.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format("%H:%M:%S"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
            .map_err(|_| de::Error::custom(format!("invalid time of day '{raw}', expected HH:MM")))
    }
}

impl Trigger {
    /// The value of the `type` tag in the schedule file.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Interval { .. } => "interval",
            Trigger::Daily { .. } => "daily",
            Trigger::Weekly { .. } => "weekly",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Interval { seconds } => write!(f, "every {seconds}s"),
            Trigger::Daily { time } => write!(f, "daily at {} UTC", time.format("%H:%M:%S")),
            Trigger::Weekly { weekday, time } => {
                write!(f, "weekly on {weekday} at {} UTC", time.format("%H:%M:%S"))
            }
        }
    }
}

/// A loaded, validated job. Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique job identifier.
    pub name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub args: JobArgs,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, trigger: Trigger, args: JobArgs) -> Self {
        Self {
            name: name.into(),
            trigger,
            args,
        }
    }

    /// Registry name of the data source (`args.source`).
    pub fn source(&self) -> Option<&str> {
        self.args.get("source").and_then(Value::as_str)
    }

    /// SCD2 dataset the job writes into; defaults to the job name.
    pub fn entity(&self) -> &str {
        self.args
            .get("entity")
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
    }

    /// Business key fields (`args.key_fields`), if the job overrides the source default.
    pub fn key_fields(&self) -> Option<Vec<String>> {
        self.args.get("key_fields").and_then(string_list)
    }

    /// Tracked attribute fields (`args.attribute_fields`). `None` tracks every non-key field.
    pub fn attribute_fields(&self) -> Option<Vec<String>> {
        self.args.get("attribute_fields").and_then(string_list)
    }
}

/// Accepts either `"a"` or `["a", "b"]`.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}
