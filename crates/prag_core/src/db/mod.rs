use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, ErrorCode};

use crate::error::{codes, AppError};

const MIGRATION_0001: (&str, &str) = (
    "0001_init.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
);

fn migrations() -> Vec<(&'static str, &'static str)> {
    vec![MIGRATION_0001]
}

/// Map a SQLite failure to an `AppError`, promoting "not a database" and corruption
/// errors to `INDEX_CORRUPT` so callers can offer a rebuild.
pub fn sqlite_error(e: rusqlite::Error, code: &str, message: &str) -> AppError {
    let corrupt = matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
    );
    if corrupt {
        AppError::new(codes::INDEX_CORRUPT, "Index store is corrupt; rebuild it from the source documents")
            .with_details(format!("{message}: {e}"))
    } else {
        AppError::new(code, message).with_details(e.to_string())
    }
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    Connection::open(path).map_err(|e| {
        let err = e.to_string();
        sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to open SQLite database")
            .with_details(format!("path={}; err={}", path.display(), err))
    })
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory()
        .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to open in-memory SQLite database"))
}

/// `PRAGMA quick_check`; anything but a single `ok` row means corruption.
pub fn check_integrity(conn: &Connection) -> Result<(), AppError> {
    let mut stmt = conn
        .prepare("PRAGMA quick_check")
        .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to run integrity check"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to run integrity check"))?;
    let mut problems = Vec::new();
    for r in rows {
        let line = r.map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to read integrity check"))?;
        if line != "ok" {
            problems.push(line);
        }
    }
    if problems.is_empty() {
        return Ok(());
    }
    Err(AppError::new(codes::INDEX_CORRUPT, "Index store failed its integrity check")
        .with_details(problems.join("; ")))
}

pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    // Track migrations by name, applying each exactly once, in deterministic order.
    conn.execute_batch(
        r#"
      CREATE TABLE IF NOT EXISTS _migrations (
        name TEXT PRIMARY KEY NOT NULL,
        applied_at TEXT NOT NULL
      );
    "#,
    )
    .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to ensure migrations table exists"))?;

    let applied: HashSet<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM _migrations")
            .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to query applied migrations"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to read applied migrations"))?;

        let mut set = HashSet::new();
        for r in rows {
            let name = r.map_err(|e| {
                sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to read applied migration row")
            })?;
            set.insert(name);
        }
        set
    };

    for (name, sql) in migrations() {
        if applied.contains(name) {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to start migration transaction"))?;

        tx.execute_batch(sql)
            .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, &format!("Migration {name} failed")))?;

        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [name],
        )
        .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, &format!("Failed to record migration {name}")))?;

        tx.commit()
            .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to commit migration transaction"))?;
    }

    Ok(())
}
