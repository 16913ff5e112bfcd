use async_trait::async_trait;
use ingest_core::{JobArgs, RawRecord};
use serde_json::{json, Value};

use crate::error::FetchError;
use crate::source::DataSource;

const DEFAULT_LIMIT: u64 = 5;
/// Largest accepted `limit`.
pub const MAX_LIMIT: u64 = 100_000;
const DEFAULT_CURRENCY: &str = "KRW";

/// Offline transaction feed for testing schedules end to end.
///
/// Output is a pure function of the arguments, so re-running a job with the
/// same arguments yields identical records:
///
/// | arg        | default | effect                                  |
/// |------------|---------|-----------------------------------------|
/// | `limit`    | 5       | number of records (`mock-0` … ), ≤ [`MAX_LIMIT`] |
/// | `seed`     | 0       | shifts every amount                     |
/// | `currency` | `"KRW"` | currency field of every record          |
/// | `fail`     | false   | return a fetch error instead of records |
#[derive(Debug, Default, Clone, Copy)]
pub struct MockSource;

#[async_trait]
impl DataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_key_fields(&self) -> Vec<String> {
        vec!["tx_id".to_string()]
    }

    async fn fetch(&self, args: &JobArgs) -> Result<Vec<RawRecord>, FetchError> {
        if args.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(FetchError::Source("mock source asked to fail".to_string()));
        }
        let limit = u64_arg(args, "limit", DEFAULT_LIMIT)?;
        if limit > MAX_LIMIT {
            return Err(FetchError::InvalidArgs(format!(
                "limit must be at most {MAX_LIMIT}, got {limit}"
            )));
        }
        let seed = u64_arg(args, "seed", 0)?;
        let currency = match args.get("currency") {
            None => DEFAULT_CURRENCY,
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(FetchError::InvalidArgs(format!(
                    "currency must be a string, got {other}"
                )))
            }
        };

        Ok((0..limit)
            .map(|i| transaction(i, seed, currency))
            .collect())
    }
}

fn transaction(index: u64, seed: u64, currency: &str) -> RawRecord {
    let cents = ((index + 1) * 1_234 + seed.wrapping_mul(7_919)) % 100_000;
    let mut record = RawRecord::new();
    record.insert("tx_id".to_string(), json!(format!("mock-{index}")));
    record.insert("amount".to_string(), json!(cents as f64 / 100.0));
    record.insert("currency".to_string(), json!(currency));
    record
}

fn u64_arg(args: &JobArgs, key: &str, default: u64) -> Result<u64, FetchError> {
    match args.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| FetchError::InvalidArgs(format!("{key} must be a non-negative integer, got {v}"))),
    }
}
