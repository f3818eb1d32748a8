//! Diagnostics.
//!
//! - **About info**: version, git SHA, platform
//! - **Cache health**: schema version, cached spreadsheets and their sale counts
//! - **Log rotation helpers**: used by [`crate::init_logging`].

use crate::db::DbState;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::CacheError;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "fulfilment-sync";

const APP_DIR: &str = "com.detour.fulfilment-sync";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Cache health
// ---------------------------------------------------------------------------

fn count(conn: &Connection, sql: &str) -> Result<i64, CacheError> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

fn sheet_summaries(conn: &Connection) -> Result<Vec<Value>, CacheError> {
    let mut stmt = conn.prepare(
        "SELECT s.spreadsheet_id, s.last_updated_at,
                COUNT(c.sale_id),
                SUM(CASE WHEN c.entry_day IS NOT NULL AND c.authorized_at IS NULL THEN 1 ELSE 0 END),
                SUM(CASE WHEN c.authorized_at IS NOT NULL THEN 1 ELSE 0 END)
         FROM sheets s
         LEFT JOIN sales c ON c.spreadsheet_id = s.spreadsheet_id
         GROUP BY s.spreadsheet_id
         ORDER BY s.last_updated_at DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_updated: i64 = row.get(1)?;
            let sales: i64 = row.get(2)?;
            let entered: Option<i64> = row.get(3)?;
            let authorized: Option<i64> = row.get(4)?;
            Ok(json!({
                "spreadsheetId": id,
                "lastUpdatedAt": chrono::DateTime::from_timestamp_millis(last_updated)
                    .map(|t| t.to_rfc3339()),
                "sales": sales,
                "entered": entered.unwrap_or(0),
                "authorized": authorized.unwrap_or(0),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Schema version, cache sizes and the on-disk database size.
pub fn get_cache_health(db: &DbState) -> Result<Value, CacheError> {
    let (schema_version, sheet_count, sale_count, sheets) = db.with_conn(|conn| {
        Ok((
            count(conn, "SELECT COALESCE(MAX(version), 0) FROM schema_version")?,
            count(conn, "SELECT COUNT(*) FROM sheets")?,
            count(conn, "SELECT COUNT(*) FROM sales")?,
            sheet_summaries(conn)?,
        ))
    })?;

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "cachedSheets": sheet_count,
        "cachedSales": sale_count,
        "sheets": sheets,
        "dbSizeBytes": db_size,
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Per-user data directory of the application.
pub fn get_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR)
}

pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Delete all but the newest `MAX_LOG_FILES` log files in `log_dir`.
/// Returns how many files were removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; ties by name so date-suffixed files order correctly.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}
