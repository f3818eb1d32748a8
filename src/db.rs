//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Holds the per-spreadsheet sale cache, the
//! spreadsheet scope table used for stale-cache trimming, and the
//! `local_settings` key/value store backing [`crate::config::AppConfig`].

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::CacheError;

/// Database file name inside the data directory.
pub const DB_FILE: &str = "fulfilment.db";

/// Shared database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Run `f` with the locked connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Lock)?;
        f(&conn)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/fulfilment.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once. Workflow flags are lost in that case;
/// sales come back on the next sync.
pub fn init(data_dir: &Path) -> Result<DbState, CacheError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| CacheError::Io(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open an in-memory database with the full schema.
pub fn init_in_memory() -> Result<DbState, CacheError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, CacheError> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, spreadsheet scopes, cached sales.
fn migrate_v1(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS sheets (
            spreadsheet_id TEXT PRIMARY KEY,
            last_updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sales (
            spreadsheet_id TEXT NOT NULL
                REFERENCES sheets(spreadsheet_id) ON DELETE CASCADE,
            sale_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            order_date TEXT,
            entry_day TEXT,
            skipped TEXT,
            authorized_at TEXT,
            cached_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (spreadsheet_id, sale_id)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Migration v2: ordered listing by order date.
fn migrate_v2(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_sales_order_date
            ON sales (spreadsheet_id, order_date);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read one setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), CacheError> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// All settings of one category as `(key, value)` pairs.
pub fn get_settings_in(
    conn: &Connection,
    category: &str,
) -> Result<Vec<(String, String)>, CacheError> {
    let mut stmt = conn.prepare(
        "SELECT setting_key, setting_value FROM local_settings
         WHERE setting_category = ?1 ORDER BY setting_key",
    )?;
    let rows = stmt
        .query_map(params![category], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ===========================================================================
// Tests
// ===========================================================================
