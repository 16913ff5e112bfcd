use async_trait::async_trait;
use ingest_core::{JobArgs, RawRecord};
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;
use crate::source::DataSource;

/// Reads a JSON array of objects from `args.path` on every run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

#[async_trait]
impl DataSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn default_key_fields(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    async fn fetch(&self, args: &JobArgs) -> Result<Vec<RawRecord>, FetchError> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::InvalidArgs("file source requires a string 'path'".to_string()))?;

        let raw = tokio::fs::read_to_string(path).await?;
        let value: Value = serde_json::from_str(&raw)?;
        let Value::Array(items) = value else {
            return Err(FetchError::Source(format!("{path}: expected a JSON array")));
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(FetchError::Source(format!(
                    "{path}: element {i} is not an object: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(%path, records = records.len(), "file source read");
        Ok(records)
    }
}
