//! Per-spreadsheet sale cache.
//!
//! Sales are stored as their JSON snapshot plus workflow columns, keyed by
//! `(spreadsheet_id, sale_id)`. Every spreadsheet scope has a row in
//! `sheets` with a `last_updated_at` stamp; scopes untouched for too long are
//! trimmed, which cascades to their sales.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::DbState;
use crate::error::CacheError;
use crate::inventory::{Product, Sale, SaleSnapshot, Workflow};

/// Cached sales of one spreadsheet.
pub trait SaleCache {
    /// Cached sale IDs, unordered.
    fn list_ids(&self) -> Result<Vec<String>, CacheError>;

    fn get(&self, id: &str) -> Result<Option<Sale>, CacheError>;

    /// Insert or refresh a snapshot. Workflow flags of an existing entry are
    /// kept.
    fn put(&self, snapshot: &SaleSnapshot) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn remove(&self, id: &str) -> Result<bool, CacheError>;

    /// Remove every entry, returning how many there were.
    fn clear(&self) -> Result<usize, CacheError>;

    /// All sales by order date, then ID.
    fn list_ordered(&self) -> Result<Vec<Sale>, CacheError>;

    /// Replace the workflow flags of a cached sale.
    fn update_workflow(&self, id: &str, workflow: &Workflow) -> Result<(), CacheError>;
}

pub struct SqliteSaleCache {
    db: Arc<DbState>,
    spreadsheet_id: String,
}

impl SqliteSaleCache {
    /// Open the scope for `spreadsheet_id`, creating it if needed.
    pub fn open(
        db: Arc<DbState>,
        spreadsheet_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        let cache = Self {
            db,
            spreadsheet_id: spreadsheet_id.to_string(),
        };
        cache.touch_scope(now)?;
        Ok(cache)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// Stamp the scope as used at `now`.
    pub fn touch_scope(&self, now: DateTime<Utc>) -> Result<(), CacheError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sheets (spreadsheet_id, last_updated_at) VALUES (?1, ?2)
                 ON CONFLICT(spreadsheet_id)
                 DO UPDATE SET last_updated_at = excluded.last_updated_at",
                params![self.spreadsheet_id, now.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sales WHERE spreadsheet_id = ?1",
                params![self.spreadsheet_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

/// Delete every scope last touched before `now - max_age`, with its sales.
/// Returns the trimmed spreadsheet IDs.
pub fn trim_scopes_older_than(
    db: &DbState,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>, CacheError> {
    let cutoff = (now - max_age).timestamp_millis();
    db.with_conn(|conn| {
        let stale: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT spreadsheet_id FROM sheets WHERE last_updated_at < ?1")?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            rows
        };
        for spreadsheet_id in &stale {
            conn.execute(
                "DELETE FROM sheets WHERE spreadsheet_id = ?1",
                params![spreadsheet_id],
            )?;
            debug!(spreadsheet_id = %spreadsheet_id, "trimmed stale sheet cache");
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "trimmed stale sheet caches");
        }
        Ok(stale)
    })
}

/// `entry_day`, `skipped` and `authorized_at` as stored.
type WorkflowColumns = (Option<String>, Option<String>, Option<String>);

/// `payload` plus the workflow columns of one row.
type SaleRow = (String, Option<String>, Option<String>, Option<String>);

fn workflow_columns(workflow: &Workflow) -> Result<WorkflowColumns, CacheError> {
    let skipped = workflow
        .skipped
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok((
        workflow.entry_day.clone(),
        skipped,
        workflow.authorized_at.map(|at| at.to_rfc3339()),
    ))
}

fn sale_from_row(row: &Row<'_>) -> rusqlite::Result<SaleRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_sale((payload, entry_day, skipped, authorized_at): SaleRow) -> Result<Sale, CacheError> {
    let snapshot: SaleSnapshot = serde_json::from_str(&payload)?;
    let skipped: Option<Vec<Product>> = skipped
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let authorized_at = authorized_at
        .map(|raw| match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(at.with_timezone(&Utc)),
            Err(_) => Err(CacheError::InvalidTimestamp {
                sale_id: snapshot.id.clone(),
                value: raw,
            }),
        })
        .transpose()?;
    Ok(Sale {
        snapshot,
        workflow: Workflow {
            entry_day,
            skipped,
            authorized_at,
        },
    })
}

const SALE_COLUMNS: &str = "payload, entry_day, skipped, authorized_at";

fn query_sales(
    conn: &Connection,
    sql: &str,
    spreadsheet_id: &str,
) -> Result<Vec<Sale>, CacheError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![spreadsheet_id], sale_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_sale).collect()
}

impl SaleCache for SqliteSaleCache {
    fn list_ids(&self) -> Result<Vec<String>, CacheError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT sale_id FROM sales WHERE spreadsheet_id = ?1")?;
            let ids = stmt
                .query_map(params![self.spreadsheet_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    fn get(&self, id: &str) -> Result<Option<Sale>, CacheError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SALE_COLUMNS} FROM sales
                         WHERE spreadsheet_id = ?1 AND sale_id = ?2"
                    ),
                    params![self.spreadsheet_id, id],
                    sale_from_row,
                )
                .optional()?;
            row.map(decode_sale).transpose()
        })
    }

    fn put(&self, snapshot: &SaleSnapshot) -> Result<(), CacheError> {
        let payload = serde_json::to_string(snapshot)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sales (spreadsheet_id, sale_id, payload, order_date, cached_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))
                 ON CONFLICT(spreadsheet_id, sale_id) DO UPDATE SET
                    payload = excluded.payload,
                    order_date = excluded.order_date,
                    cached_at = excluded.cached_at",
                params![
                    self.spreadsheet_id,
                    snapshot.id,
                    payload,
                    snapshot.sale_order_date
                ],
            )?;
            Ok(())
        })
    }

    fn remove(&self, id: &str) -> Result<bool, CacheError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM sales WHERE spreadsheet_id = ?1 AND sale_id = ?2",
                params![self.spreadsheet_id, id],
            )?;
            Ok(removed > 0)
        })
    }

    fn clear(&self) -> Result<usize, CacheError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM sales WHERE spreadsheet_id = ?1",
                params![self.spreadsheet_id],
            )?;
            Ok(removed)
        })
    }

    fn list_ordered(&self) -> Result<Vec<Sale>, CacheError> {
        self.db.with_conn(|conn| {
            query_sales(
                conn,
                &format!(
                    "SELECT {SALE_COLUMNS} FROM sales WHERE spreadsheet_id = ?1
                     ORDER BY order_date, sale_id"
                ),
                &self.spreadsheet_id,
            )
        })
    }

    fn update_workflow(&self, id: &str, workflow: &Workflow) -> Result<(), CacheError> {
        let (entry_day, skipped, authorized_at) = workflow_columns(workflow)?;
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE sales SET entry_day = ?3, skipped = ?4, authorized_at = ?5
                 WHERE spreadsheet_id = ?1 AND sale_id = ?2",
                params![self.spreadsheet_id, id, entry_day, skipped, authorized_at],
            )?;
            if updated == 0 {
                return Err(CacheError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}
