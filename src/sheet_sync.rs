//! Adds and removes an order on a production spreadsheet.
//!
//! An order occupies two places: its account name in the weekday's column
//! of the `Entry` sheet, and one row per product category on the weekday's
//! day sheet. Both reads happen first, then every write is issued at once and
//! awaited together; a failed write never hides the outcome of the others.

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::SaleCache;
use crate::columns::{cell_ref, column_range, row_range};
use crate::error::{CacheError, SyncError, WriteFailure};
use crate::inventory::{Product, SaleSnapshot, WorkflowState};
use crate::layout::{ProductType, SheetLayoutConfig, ENTRY_SHEET};
use crate::reconcile::{invalid_transition, mark_entered, mark_unentered};
use crate::rows::{
    find_add_row, find_remove_row, map_sale_items, snapshot_range, RowSnapshot, RowValues,
};
use crate::sheets::{MajorDimension, SheetsApi};

/// Where the account name sits on the entry sheet after an add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum EntryMarker {
    AlreadyListed { row: u32 },
    Written { row: u32 },
    /// Every slot of the weekday column is taken; nothing was written.
    SheetFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub entry: EntryMarker,
    pub rows_written: Vec<(ProductType, u32)>,
    /// Categories with quantities but no free row in their band.
    pub categories_skipped_full: Vec<ProductType>,
    /// Line items no category maps.
    pub skipped_items: Vec<Product>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOutcome {
    pub entry_cleared: Option<u32>,
    pub rows_cleared: Vec<(ProductType, u32)>,
}

/// One planned spreadsheet row overwrite.
#[derive(Debug, Clone)]
struct SheetWrite {
    range: String,
    values: Vec<String>,
}

impl SheetWrite {
    fn update(range: String, values: Vec<String>) -> Self {
        Self { range, values }
    }
}

pub struct SheetSyncEngine<S> {
    sheets: S,
    layout: Arc<SheetLayoutConfig>,
}

impl<S: SheetsApi> SheetSyncEngine<S> {
    pub fn new(sheets: S, layout: Arc<SheetLayoutConfig>) -> Self {
        Self { sheets, layout }
    }

    pub fn layout(&self) -> &SheetLayoutConfig {
        &self.layout
    }

    pub fn sheets(&self) -> &S {
        &self.sheets
    }

    fn entry_column(&self, weekday: &str) -> Result<&str, SyncError> {
        self.layout
            .entry_column(weekday)
            .ok_or_else(|| SyncError::UnknownWeekday(weekday.to_string()))
    }

    /// Account names in the weekday's entry column, top to bottom.
    async fn read_entries(&self, column: &str) -> Result<Vec<String>, SyncError> {
        let entry = &self.layout.entry;
        let range = column_range(ENTRY_SHEET, column, entry.start(), entry.end());
        let values = self.sheets.get_values(&range, MajorDimension::Columns).await?;
        Ok(values.into_iter().next().unwrap_or_default())
    }

    /// Fresh invoice/account snapshot of a day sheet.
    async fn read_rows(&self, weekday: &str) -> Result<RowSnapshot, SyncError> {
        let values = self
            .sheets
            .get_values(&snapshot_range(weekday), MajorDimension::Columns)
            .await?;
        Ok(RowSnapshot::from_columns(values))
    }

    async fn execute(&self, write: &SheetWrite) -> Result<(), WriteFailure> {
        self.sheets
            .update_values(&write.range, &write.values)
            .await
            .map_err(|error| WriteFailure {
                range: write.range.clone(),
                error,
            })
    }

    /// Issue every write concurrently and wait for all of them.
    async fn execute_all(&self, writes: &[SheetWrite]) -> Result<(), SyncError> {
        let results = join_all(writes.iter().map(|write| self.execute(write))).await;
        let failures: Vec<WriteFailure> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            warn!(range = %failure.range, error = %failure.error, "sheet write failed");
        }
        Err(SyncError::PartialWrite {
            attempted: writes.len(),
            failures,
        })
    }

    /// Write an order to the entry sheet and the weekday's day sheet.
    pub async fn add_order(
        &self,
        sale: &SaleSnapshot,
        weekday: &str,
    ) -> Result<AddOutcome, SyncError> {
        let column = self.entry_column(weekday)?;
        let invoice = sale.invoice_number();
        let account = sale.customer_name();

        let (entries, snapshot) = tokio::join!(self.read_entries(column), self.read_rows(weekday));
        let (entries, snapshot) = (entries?, snapshot?);

        let mut writes = Vec::new();

        let (entry, entry_write) = self.plan_entry(&entries, column, &account);
        writes.extend(entry_write);
        if entry == EntryMarker::SheetFull {
            warn!(sale_id = %sale.id, weekday, "entry column is full, account not listed");
        }

        let mapped = map_sale_items(&self.layout, sale.items());
        let mut rows_written = Vec::new();
        let mut categories_skipped_full = Vec::new();

        for (product_type, row_values) in mapped.with_entries() {
            let Some(config) = self.layout.category(product_type) else {
                continue;
            };
            match find_add_row(&snapshot, config, invoice, &account) {
                Some(row) => {
                    writes.push(SheetWrite::update(
                        self.day_row_range(weekday, row),
                        row_values.with_identity(invoice, &account),
                    ));
                    rows_written.push((product_type, row));
                }
                None => categories_skipped_full.push(product_type),
            }
        }

        self.execute_all(&writes).await?;

        info!(
            sale_id = %sale.id,
            weekday,
            rows = rows_written.len(),
            skipped_items = mapped.skipped.len(),
            "order added to sheet"
        );

        Ok(AddOutcome {
            entry,
            rows_written,
            categories_skipped_full,
            skipped_items: mapped.skipped,
        })
    }

    /// Decide the entry-sheet marker and the write it needs, if any.
    ///
    /// The account reuses the first blank slot in the column; when there is
    /// none it goes in the slot right after the last entry. Either way the
    /// cell is addressed directly so the reported row is where it lands.
    fn plan_entry(
        &self,
        entries: &[String],
        column: &str,
        account: &str,
    ) -> (EntryMarker, Option<SheetWrite>) {
        let entry = &self.layout.entry;
        if let Some(index) = entries.iter().position(|name| name == account) {
            let row = entry.start() + index as u32;
            return (EntryMarker::AlreadyListed { row }, None);
        }

        let blank = entries.iter().position(|name| name.trim().is_empty());
        let row = entry.start() + blank.unwrap_or(entries.len()) as u32;
        if row >= entry.end() {
            return (EntryMarker::SheetFull, None);
        }

        let write = SheetWrite::update(
            cell_ref(ENTRY_SHEET, column, row),
            vec![account.to_string()],
        );
        (EntryMarker::Written { row }, Some(write))
    }

    fn day_row_range(&self, weekday: &str, row: u32) -> String {
        row_range(weekday, "A", &self.layout.max_column, row)
    }

    /// Clear an order from the entry sheet and the day sheet. Rows that no
    /// longer hold the order are left alone.
    pub async fn remove_order(
        &self,
        sale: &SaleSnapshot,
        weekday: &str,
    ) -> Result<RemoveOutcome, SyncError> {
        let column = self.entry_column(weekday)?;
        let invoice = sale.invoice_number();
        let account = sale.customer_name();

        let (entries, snapshot) = tokio::join!(self.read_entries(column), self.read_rows(weekday));
        let (entries, snapshot) = (entries?, snapshot?);

        let mut writes = Vec::new();
        let mut outcome = RemoveOutcome::default();

        if let Some(index) = entries.iter().position(|name| *name == account) {
            let row = self.layout.entry.start() + index as u32;
            writes.push(SheetWrite::update(
                cell_ref(ENTRY_SHEET, column, row),
                vec![String::new()],
            ));
            outcome.entry_cleared = Some(row);
        }

        let blank = RowValues::empty(self.layout.row_length).values;
        for (product_type, config) in self.layout.categories() {
            if let Some(row) = find_remove_row(&snapshot, config, invoice, &account) {
                writes.push(SheetWrite::update(
                    self.day_row_range(weekday, row),
                    blank.clone(),
                ));
                outcome.rows_cleared.push((product_type, row));
            }
        }

        self.execute_all(&writes).await?;

        info!(
            sale_id = %sale.id,
            weekday,
            rows = outcome.rows_cleared.len(),
            "order removed from sheet"
        );
        Ok(outcome)
    }

    /// Mark a cached sale entered and write it to the sheet.
    ///
    /// The sale is marked first so the UI moves it on immediately. If the
    /// sheet write fails the mark is rolled back and whatever was written is
    /// removed again; if that removal fails too, both errors are returned.
    pub async fn enter_order<C: SaleCache>(
        &self,
        cache: &C,
        sale_id: &str,
        weekday: &str,
    ) -> Result<AddOutcome, SyncError> {
        self.entry_column(weekday)?;
        let sale = cache
            .get(sale_id)?
            .ok_or_else(|| CacheError::NotFound(sale_id.to_string()))?;

        let skipped = map_sale_items(&self.layout, sale.snapshot.items()).skipped;
        mark_entered::<_, SyncError>(cache, sale_id, weekday, skipped)?;

        let original = match self.add_order(&sale.snapshot, weekday).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        warn!(sale_id, weekday, error = %original, "entering order failed, rolling back");
        if let Err(e) = mark_unentered::<_, SyncError>(cache, sale_id) {
            warn!(sale_id, error = %e, "failed to roll back entered flag");
        }

        match self.remove_order(&sale.snapshot, weekday).await {
            Ok(_) => Err(original),
            Err(compensation) => Err(SyncError::CompensationFailed {
                original: Box::new(original),
                compensation: Box::new(compensation),
            }),
        }
    }

    /// Remove an entered sale from the sheet and clear its entry flags.
    /// Returns `None` when the sale was not entered. Authorized sales are
    /// rejected before anything on the sheet changes.
    pub async fn unenter_order<C: SaleCache>(
        &self,
        cache: &C,
        sale_id: &str,
    ) -> Result<Option<RemoveOutcome>, SyncError> {
        let sale = cache
            .get(sale_id)?
            .ok_or_else(|| CacheError::NotFound(sale_id.to_string()))?;
        if sale.workflow_state() == WorkflowState::Authorized {
            return Err(invalid_transition(&sale, WorkflowState::Unentered).into());
        }
        let Some(weekday) = sale.workflow.entry_day.clone() else {
            return Ok(None);
        };

        let outcome = self.remove_order(&sale.snapshot, &weekday).await?;
        mark_unentered::<_, SyncError>(cache, sale_id)?;
        Ok(Some(outcome))
    }
}
