//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::RefactoryResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 6 CREATE TABLE + 3 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (6) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS project (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        working_copy TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS change_request (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES project(id),
        external_number INTEGER NOT NULL,
        head_sha TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        web_url TEXT NOT NULL DEFAULT '',
        tracked_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(project_id, external_number)
    );",
    "CREATE TABLE IF NOT EXISTS model (
        id TEXT PRIMARY KEY,
        refactoring_type TEXT NOT NULL DEFAULT '',
        trained_on TEXT NOT NULL DEFAULT '',
        model_type TEXT NOT NULL DEFAULT '',
        model_path TEXT NOT NULL,
        message_template TEXT NOT NULL,
        feature_names_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS recommendation_candidate (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        change_request_id INTEGER NOT NULL
            REFERENCES change_request(id) ON DELETE CASCADE,
        model_id TEXT NOT NULL REFERENCES model(id),
        old_path TEXT NOT NULL,
        new_path TEXT NOT NULL,
        line_number INTEGER NOT NULL,
        unit_name TEXT NOT NULL,
        features_json TEXT NOT NULL,
        label INTEGER NOT NULL,
        probability REAL NOT NULL CHECK(probability BETWEEN 0.0 AND 1.0),
        externalized INTEGER NOT NULL DEFAULT 0,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (3) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_change_request_project ON change_request(project_id);",
    "CREATE INDEX IF NOT EXISTS idx_candidate_change_request \
     ON recommendation_candidate(change_request_id);",
    "CREATE INDEX IF NOT EXISTS idx_candidate_model ON recommendation_candidate(model_id);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> RefactoryResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT refactory_migrate_step;")?;

        let step_result = (|| -> RefactoryResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT refactory_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                tracing::debug!("Migrated schema to version {}", next_version);
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT refactory_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT refactory_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                tracing::error!("Schema migration to version {} failed: {}", next_version, e);
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `store_meta`.
/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> RefactoryResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> RefactoryResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op. The tables come from [`SCHEMA_STATEMENTS`].
fn migrate_to_v1(_conn: &Connection) -> RefactoryResult<()> {
    Ok(())
}
