use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ingest_core::clock::{format_ts, parse_ts, Clock};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::record::{canonical_json, row_hash};
use crate::types::{EntityVersion, UpsertOutcome};

const INSERT_VERSION: &str = "INSERT INTO entity_versions
     (entity, business_key, payload, row_hash, valid_from, valid_to, is_current)
     VALUES (?1, ?2, ?3, ?4, ?5, NULL, 1)";

const SELECT_VERSION: &str = "SELECT id, entity, business_key, payload, row_hash,
            valid_from, valid_to, is_current
     FROM entity_versions";

/// SCD Type 2 persistence engine.
///
/// Writers to the same `(entity, business_key)` are serialised by a per-key
/// lock; writers to different keys only contend on the connection for the
/// duration of a single statement or transaction. The close-and-insert swap
/// additionally checks that the version it closes is still current, so a
/// second process sharing the file cannot fork a key's timeline.
pub struct Scd2Store {
    db: Mutex<Connection>,
    key_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl Scd2Store {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            key_locks: DashMap::new(),
        })
    }

    /// Apply one incoming payload to the key's timeline at instant `at`.
    ///
    /// - no current version: open one (`valid_from = at`)
    /// - current version with an equal payload: no-op
    /// - current version with a different payload: close it at `at` and open a new one
    ///
    /// `at` must be strictly after the current version's `valid_from`, otherwise
    /// [`StoreError::Ordering`] is returned and nothing is written.
    #[instrument(skip(self, payload), fields(%entity, %business_key))]
    pub fn upsert(
        &self,
        entity: &str,
        business_key: &str,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        self.with_key_lock(entity, business_key, || {
            self.upsert_serialized(entity, business_key, payload, at)
        })
    }

    /// Like [`upsert`](Self::upsert), but reads the write instant from `clock`
    /// once the key lock is held. Writers racing on one key therefore apply
    /// their changes in timestamp order.
    #[instrument(skip(self, payload, clock), fields(%entity, %business_key))]
    pub fn upsert_now(
        &self,
        entity: &str,
        business_key: &str,
        payload: &Value,
        clock: &dyn Clock,
    ) -> Result<UpsertOutcome> {
        self.with_key_lock(entity, business_key, || {
            self.upsert_serialized(entity, business_key, payload, clock.now())
        })
    }

    /// The open version for a key, if any.
    pub fn current(&self, entity: &str, business_key: &str) -> Result<Option<EntityVersion>> {
        let db = self.conn()?;
        let raw = db
            .query_row(
                &format!("{SELECT_VERSION} WHERE entity = ?1 AND business_key = ?2 AND is_current = 1"),
                rusqlite::params![entity, business_key],
                RawVersion::from_row,
            )
            .optional()?;
        raw.map(RawVersion::into_version).transpose()
    }

    /// Every version of a key, oldest first.
    pub fn history(&self, entity: &str, business_key: &str) -> Result<Vec<EntityVersion>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_VERSION} WHERE entity = ?1 AND business_key = ?2 ORDER BY valid_from, id"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![entity, business_key], RawVersion::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawVersion::into_version).collect()
    }

    pub fn count_versions(&self, entity: &str, business_key: &str) -> Result<u64> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM entity_versions WHERE entity = ?1 AND business_key = ?2",
            rusqlite::params![entity, business_key],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Number of keys with an open version in `entity`.
    pub fn count_current(&self, entity: &str) -> Result<u64> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM entity_versions WHERE entity = ?1 AND is_current = 1",
            [entity],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    // --- private helpers ---------------------------------------------------

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn key_lock(&self, entity: &str, business_key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry((entity.to_string(), business_key.to_string()))
            .or_default()
            .clone()
    }

    /// Run `write` while holding the lock for `(entity, business_key)`.
    fn with_key_lock<T>(
        &self,
        entity: &str,
        business_key: &str,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let lock = self.key_lock(entity, business_key);
        let outcome = {
            let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;
            write()
        };
        drop(lock);
        // Forget the lock once nobody else is waiting on it.
        self.key_locks
            .remove_if(&(entity.to_string(), business_key.to_string()), |_, l| {
                Arc::strong_count(l) == 1
            });
        outcome
    }

    /// Body of [`upsert`](Self::upsert); the caller holds the key lock.
    fn upsert_serialized(
        &self,
        entity: &str,
        business_key: &str,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let canonical = canonical_json(payload)?;
        let hash = row_hash(&canonical);
        let at_str = format_ts(at);

        let current: Option<(i64, String, String)> = {
            let db = self.conn()?;
            db.query_row(
                "SELECT id, row_hash, valid_from FROM entity_versions
                 WHERE entity = ?1 AND business_key = ?2 AND is_current = 1",
                rusqlite::params![entity, business_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
        };

        let Some((current_id, current_hash, current_from)) = current else {
            let db = self.conn()?;
            db.execute(
                INSERT_VERSION,
                rusqlite::params![entity, business_key, canonical, hash, at_str],
            )
            .map_err(|e| conflict_or(e, business_key))?;
            debug!("first sighting, version opened");
            return Ok(UpsertOutcome::Inserted);
        };

        let current_from = parse_ts(&current_from)?;
        if at <= current_from {
            return Err(StoreError::Ordering {
                business_key: business_key.to_string(),
                at,
                current_from,
            });
        }

        if current_hash == hash {
            debug!("payload unchanged");
            return Ok(UpsertOutcome::Unchanged);
        }

        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let closed = tx.execute(
            "UPDATE entity_versions SET valid_to = ?1, is_current = 0
             WHERE id = ?2 AND is_current = 1",
            rusqlite::params![at_str, current_id],
        )?;
        if closed != 1 {
            // Dropping `tx` rolls back.
            return Err(StoreError::Conflict {
                business_key: business_key.to_string(),
            });
        }
        tx.execute(
            INSERT_VERSION,
            rusqlite::params![entity, business_key, canonical, hash, at_str],
        )
        .map_err(|e| conflict_or(e, business_key))?;
        tx.commit()?;
        debug!(closed_id = current_id, "version superseded");
        Ok(UpsertOutcome::Superseded)
    }
}

/// A unique-index violation on the current-version index means another
/// writer opened a version first.
fn conflict_or(err: rusqlite::Error, business_key: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict {
                business_key: business_key.to_string(),
            }
        }
        _ => err.into(),
    }
}

struct RawVersion {
    id: i64,
    entity: String,
    business_key: String,
    payload: String,
    row_hash: String,
    valid_from: String,
    valid_to: Option<String>,
    is_current: bool,
}

impl RawVersion {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity: row.get(1)?,
            business_key: row.get(2)?,
            payload: row.get(3)?,
            row_hash: row.get(4)?,
            valid_from: row.get(5)?,
            valid_to: row.get(6)?,
            is_current: row.get::<_, i64>(7)? == 1,
        })
    }

    fn into_version(self) -> Result<EntityVersion> {
        Ok(EntityVersion {
            id: self.id,
            entity: self.entity,
            business_key: self.business_key,
            payload: serde_json::from_str(&self.payload)?,
            row_hash: self.row_hash,
            valid_from: parse_ts(&self.valid_from)?,
            valid_to: self.valid_to.as_deref().map(parse_ts).transpose()?,
            is_current: self.is_current,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn store() -> Scd2Store {
        Scd2Store::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    /// Versions ordered by valid_from must chain end-to-start with exactly one open tail.
    fn assert_contiguous(versions: &[EntityVersion]) {
        let open: Vec<_> = versions.iter().filter(|v| v.valid_to.is_none()).collect();
        assert_eq!(open.len(), 1, "exactly one current version");
        assert!(open[0].is_current);
        for pair in versions.windows(2) {
            assert_eq!(pair[0].valid_to, Some(pair[1].valid_from));
            assert!(!pair[0].is_current);
        }
        assert!(versions.last().unwrap().is_current);
    }

    #[test]
    fn first_sighting_opens_current_version() {
        let s = store();
        let outcome = s.upsert("tx", "mock-0", &json!({"amount": 1}), t0()).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let current = s.current("tx", "mock-0").unwrap().unwrap();
        assert_eq!(current.valid_from, t0());
        assert!(current.valid_to.is_none());
        assert!(current.is_current);
        assert_eq!(current.payload, json!({"amount": 1}));
    }

    #[test]
    fn unchanged_payload_is_a_noop() {
        let s = store();
        s.upsert("tx", "k", &json!({"amount": 1, "currency": "KRW"}), t0())
            .unwrap();
        let outcome = s
            .upsert(
                "tx",
                "k",
                &json!({"currency": "KRW", "amount": 1}),
                t0() + Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(s.count_versions("tx", "k").unwrap(), 1);
    }

    #[test]
    fn changed_payload_closes_and_opens() {
        let s = store();
        let t1 = t0() + Duration::minutes(5);
        s.upsert("tx", "k", &json!({"amount": 1}), t0()).unwrap();
        let outcome = s.upsert("tx", "k", &json!({"amount": 2}), t1).unwrap();
        assert_eq!(outcome, UpsertOutcome::Superseded);

        let versions = s.history("tx", "k").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].valid_to, Some(t1));
        assert_eq!(versions[1].valid_from, t1);
        assert_eq!(versions[1].payload, json!({"amount": 2}));
        assert_contiguous(&versions);
    }

    #[test]
    fn timeline_stays_contiguous_over_many_changes() {
        let s = store();
        for i in 0..10 {
            // Every third write repeats the previous payload.
            let amount = i - (i % 3 == 2) as i64;
            s.upsert("tx", "k", &json!({ "amount": amount }), t0() + Duration::seconds(i))
                .unwrap();
        }
        let versions = s.history("tx", "k").unwrap();
        assert_contiguous(&versions);
        assert_eq!(s.count_current("tx").unwrap(), 1);
    }

    #[test]
    fn non_increasing_timestamp_is_rejected_without_writing() {
        let s = store();
        let t1 = t0() + Duration::minutes(1);
        s.upsert("tx", "k", &json!({"amount": 1}), t1).unwrap();

        for at in [t1, t0()] {
            let err = s.upsert("tx", "k", &json!({"amount": 9}), at).unwrap_err();
            assert!(matches!(err, StoreError::Ordering { .. }));
        }
        // Same payload at a stale timestamp is rejected as well.
        let err = s.upsert("tx", "k", &json!({"amount": 1}), t0()).unwrap_err();
        assert!(matches!(err, StoreError::Ordering { .. }));

        let versions = s.history("tx", "k").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].payload, json!({"amount": 1}));
    }

    #[test]
    fn entities_do_not_share_keys() {
        let s = store();
        s.upsert("tx", "k", &json!({"a": 1}), t0()).unwrap();
        s.upsert("accounts", "k", &json!({"a": 2}), t0()).unwrap();
        assert_eq!(s.count_current("tx").unwrap(), 1);
        assert_eq!(s.count_current("accounts").unwrap(), 1);
        assert_eq!(s.current("tx", "k").unwrap().unwrap().payload, json!({"a": 1}));
    }

    #[test]
    fn key_locks_are_released() {
        let s = store();
        s.upsert("tx", "k", &json!({"a": 1}), t0()).unwrap();
        assert!(s.key_locks.is_empty());
    }

    #[test]
    fn concurrent_writers_keep_one_current_version() {
        let s = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let at = t0() + Duration::milliseconds(i * 100 + j + 1);
                        // Ordering rejections are expected when another writer got further ahead.
                        let _ = s.upsert("tx", "shared", &json!({"w": i, "j": j}), at);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let versions = s.history("tx", "shared").unwrap();
        assert_contiguous(&versions);
    }

    /// Hands out a strictly later instant on every call.
    struct TickingClock(AtomicI64);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            t0() + Duration::microseconds(self.0.fetch_add(1, AtomicOrdering::SeqCst))
        }
    }

    #[test]
    fn racing_writers_stamped_under_the_key_lock_never_reorder() {
        let s = Arc::new(store());
        let clock = Arc::new(TickingClock(AtomicI64::new(0)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&s);
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        s.upsert_now("tx", "shared", &json!({"w": i, "j": j}), clock.as_ref())
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let versions = s.history("tx", "shared").unwrap();
        assert_eq!(versions.len(), 200);
        assert_contiguous(&versions);
    }

    #[test]
    fn externally_closed_key_is_reopened() {
        let s = store();
        s.upsert("tx", "k", &json!({"a": 1}), t0()).unwrap();
        // Simulate another process closing the current version behind our back.
        {
            let db = s.conn().unwrap();
            db.execute(
                "UPDATE entity_versions SET is_current = 0, valid_to = ?1",
                [format_ts(t0() + Duration::seconds(1))],
            )
            .unwrap();
        }
        // No current version any more: the key is treated as a first sighting.
        let outcome = s
            .upsert("tx", "k", &json!({"a": 2}), t0() + Duration::seconds(2))
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(s.count_versions("tx", "k").unwrap(), 2);
    }
}
