use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a writer waits on a locked database before reporting it unavailable.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database file and run the schema migrations.
///
/// Each store takes its own connection to the same file, so callers open
/// once per store.
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise the ingestion schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_history_table(conn)?;
    create_entity_versions_table(conn)?;
    Ok(())
}

/// One row per execution attempt. UPDATE and DELETE are refused by triggers.
fn create_history_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ingestion_history (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id            TEXT    NOT NULL UNIQUE,
            job_name          TEXT    NOT NULL,
            run_trigger       TEXT    NOT NULL,   -- 'scheduled' | 'forced'
            status            TEXT    NOT NULL,   -- 'success' | 'failure'
            run_started_at    TEXT    NOT NULL,
            run_finished_at   TEXT    NOT NULL,
            duration_ms       INTEGER NOT NULL,
            records_processed INTEGER NOT NULL,
            versions_created  INTEGER NOT NULL,
            error_detail      TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_history_job
            ON ingestion_history (job_name, run_started_at);

        CREATE TRIGGER IF NOT EXISTS ingestion_history_no_update
            BEFORE UPDATE ON ingestion_history
        BEGIN
            SELECT RAISE(ABORT, 'ingestion_history is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS ingestion_history_no_delete
            BEFORE DELETE ON ingestion_history
        BEGIN
            SELECT RAISE(ABORT, 'ingestion_history is append-only');
        END;
        ",
    )?;
    Ok(())
}

fn create_entity_versions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entity_versions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            entity        TEXT    NOT NULL,
            business_key  TEXT    NOT NULL,
            payload       TEXT    NOT NULL,   -- canonical JSON
            row_hash      TEXT    NOT NULL,   -- sha256 of payload
            valid_from    TEXT    NOT NULL,
            valid_to      TEXT,               -- NULL while current
            is_current    INTEGER NOT NULL CHECK (is_current IN (0, 1)),
            CHECK ((is_current = 1) = (valid_to IS NULL))
        ) STRICT;

        -- At most one open version per key.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_current
            ON entity_versions (entity, business_key) WHERE is_current = 1;

        CREATE INDEX IF NOT EXISTS idx_entity_timeline
            ON entity_versions (entity, business_key, valid_from);
        ",
    )?;
    Ok(())
}
