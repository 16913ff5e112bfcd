pub use ingest_core::types::RawRecord;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// Split a raw record into its business key and the payload that SCD2 tracks.
///
/// The business key is the canonical JSON array of the key values, in
/// `key_fields` order: `["kr",7]`. Values keep their JSON type, so `"7"` and
/// `7` are different keys, and a separator inside a value cannot merge two
/// keys into one.
///
/// The payload holds `attribute_fields` when given, otherwise every field that
/// is not part of the key. Missing attribute fields are tracked as `null`.
pub fn split_record(
    record: &RawRecord,
    key_fields: &[String],
    attribute_fields: Option<&[String]>,
) -> Result<(String, Value)> {
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        match record.get(field) {
            None | Some(Value::Null) => {
                return Err(StoreError::MissingBusinessKey {
                    field: field.clone(),
                })
            }
            Some(value) => parts.push(value.clone()),
        }
    }

    let payload: Map<String, Value> = match attribute_fields {
        Some(fields) => fields
            .iter()
            .map(|f| (f.clone(), record.get(f).cloned().unwrap_or(Value::Null)))
            .collect(),
        None => record
            .iter()
            .filter(|(k, _)| !key_fields.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };

    let business_key = serde_json::to_string(&Value::Array(parts))?;
    Ok((business_key, Value::Object(payload)))
}

/// Canonical text of a payload: object keys sorted at every depth.
pub fn canonical_json(payload: &Value) -> Result<String> {
    // serde_json's default map is ordered, so plain serialisation is canonical.
    Ok(serde_json::to_string(payload)?)
}

/// Hex SHA-256 of the canonical payload. Equal digests mean field-by-field equal payloads.
pub fn row_hash(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
