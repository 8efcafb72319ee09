//! Schema migrations for the durable partition log.

use rusqlite::Connection;

use trustchain_core::now_millis;

use crate::error::{BridgeError, Result};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the database up to [`CURRENT_VERSION`]. Safe to call repeatedly.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(BridgeError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per record, ordered per partition by seq (1-based).
        CREATE TABLE partition_log (
            partition_key TEXT NOT NULL,      -- "{topic}#{index}"
            seq INTEGER NOT NULL,
            record_id BLOB NOT NULL,          -- 32 bytes, Blake3 content address
            record BLOB NOT NULL,             -- CBOR-encoded signed record
            appended_at INTEGER NOT NULL,     -- local wall clock (Unix ms)
            PRIMARY KEY (partition_key, seq)
        );

        CREATE INDEX idx_partition_log_record ON partition_log(record_id);
        "#,
    )?;
    Ok(())
}
