//! SQLite schema and versioned migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each entry of
//! [`MIGRATIONS`] moves the database from version `i` to `i + 1`.

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const V1_METRICS: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('gauge', 'counter')),
    value REAL,
    delta INTEGER,
    CHECK (
        (kind = 'gauge' AND value IS NOT NULL AND delta IS NULL)
        OR (kind = 'counter' AND typeof(delta) = 'integer' AND value IS NULL)
    )
);
"#;

/// Ordered migrations; index `i` upgrades version `i` to `i + 1`.
pub const MIGRATIONS: &[&str] = &[V1_METRICS];

/// What [`migrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied { from: u32, to: u32 },
    NoChange,
}

/// Error from [`migrate`].
#[derive(Debug)]
pub enum MigrationError {
    Sql(rusqlite::Error),
    TooNew { found: u32 },
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

pub fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Bring the schema to [`SCHEMA_VERSION`] in one transaction.
pub fn migrate(conn: &mut Connection) -> Result<MigrationOutcome, MigrationError> {
    let from = user_version(conn)?;
    if from == SCHEMA_VERSION {
        return Ok(MigrationOutcome::NoChange);
    }
    if from > SCHEMA_VERSION {
        return Err(MigrationError::TooNew { found: from });
    }

    let tx = conn.transaction()?;
    for step in &MIGRATIONS[from as usize..] {
        tx.execute_batch(step)?;
    }
    // PRAGMA does not take bound parameters
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    tx.commit()?;

    Ok(MigrationOutcome::Applied {
        from,
        to: SCHEMA_VERSION,
    })
}
