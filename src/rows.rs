//! Day-sheet row mapping and row finding.
//!
//! A sale's line items become one row vector per product category; each
//! category owns a band of rows on the day sheet. The row finder scans a
//! single snapshot of the day sheet's invoice (A) and account (B) columns to
//! pick the row an order is written to or removed from.

use tracing::warn;

use crate::columns::column_to_index;
use crate::inventory::Product;
use crate::layout::{EntryConfig, ProductType, SheetLayoutConfig};

// ---------------------------------------------------------------------------
// Row values
// ---------------------------------------------------------------------------

/// One day-sheet row for one category. Cells 0 and 1 are reserved for the
/// invoice code and account name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowValues {
    pub values: Vec<String>,
    pub has_entries: bool,
}

impl RowValues {
    pub fn empty(len: usize) -> Self {
        Self {
            values: vec![String::new(); len],
            has_entries: false,
        }
    }

    /// The row as written: identity cells filled, quantities in place.
    pub fn with_identity(&self, invoice: &str, account: &str) -> Vec<String> {
        let mut values = self.values.clone();
        if let Some(cell) = values.get_mut(0) {
            *cell = invoice.to_string();
        }
        if let Some(cell) = values.get_mut(1) {
            *cell = account.to_string();
        }
        values
    }
}

/// Per-category rows for one sale plus the items no category claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRows {
    rows: Vec<(ProductType, RowValues)>,
    pub skipped: Vec<Product>,
}

impl CategoryRows {
    pub fn get(&self, product_type: ProductType) -> Option<&RowValues> {
        self.rows
            .iter()
            .find(|(t, _)| *t == product_type)
            .map(|(_, row)| row)
    }

    /// Categories with at least one quantity, in precedence order.
    pub fn with_entries(&self) -> impl Iterator<Item = (ProductType, &RowValues)> {
        self.rows
            .iter()
            .filter(|(_, row)| row.has_entries)
            .map(|(t, row)| (*t, row))
    }
}

/// Place each item's quantity in the first category (bulk, one-kilo,
/// retail, sample) whose column map lists its SKU.
pub fn map_sale_items(layout: &SheetLayoutConfig, items: &[Product]) -> CategoryRows {
    let mut rows: Vec<(ProductType, RowValues)> = layout
        .categories()
        .map(|(t, _)| (t, RowValues::empty(layout.row_length)))
        .collect();
    let mut skipped = Vec::new();

    for item in items {
        let placed = layout.categories().zip(rows.iter_mut()).find_map(
            |((product_type, config), (_, row))| {
                let index = column_to_index(config.column(&item.sku)?).ok()?;
                let cell = row.values.get_mut(index)?;
                *cell = item.quantity.to_string();
                row.has_entries = true;
                Some(product_type)
            },
        );
        if placed.is_none() {
            skipped.push(item.clone());
        }
    }

    CategoryRows { rows, skipped }
}

// ---------------------------------------------------------------------------
// Row finder
// ---------------------------------------------------------------------------

/// Range read for a row snapshot: the invoice and account columns.
pub fn snapshot_range(weekday: &str) -> String {
    format!("{weekday}!A:B")
}

/// Invoice and account columns of a day sheet, read column-major in one
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    invoices: Vec<String>,
    accounts: Vec<String>,
}

impl RowSnapshot {
    pub fn from_columns(values: Vec<Vec<String>>) -> Self {
        let mut columns = values.into_iter();
        Self {
            invoices: columns.next().unwrap_or_default(),
            accounts: columns.next().unwrap_or_default(),
        }
    }

    /// Cells of 1-based sheet row `row`; cells past the data are blank.
    fn cells(&self, row: u32) -> (&str, &str) {
        let index = row.saturating_sub(1) as usize;
        (cell(&self.invoices, index), cell(&self.accounts, index))
    }

    /// First row in `[start, end)` accepted by `predicate(invoice, account)`.
    pub fn find(&self, rows: (u32, u32), predicate: impl Fn(&str, &str) -> bool) -> Option<u32> {
        let (start, end) = rows;
        (start..end).find(|row| {
            let (invoice, account) = self.cells(*row);
            predicate(invoice, account)
        })
    }
}

fn cell(column: &[String], index: usize) -> &str {
    column.get(index).map(String::as_str).unwrap_or_default()
}

fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

/// Row to write an order into: the first row that is free (blank invoice or
/// blank account) or already holds this order.
pub fn find_add_row(
    snapshot: &RowSnapshot,
    config: &EntryConfig,
    invoice: &str,
    account: &str,
) -> Option<u32> {
    let row = snapshot.find(config.rows, |row_invoice, row_account| {
        is_blank(row_account)
            || is_blank(row_invoice)
            || (row_account == account && row_invoice == invoice)
    });
    if row.is_none() {
        warn!(invoice, account, rows = ?config.rows, "no free row in category band");
    }
    row
}

/// Row currently holding exactly this order.
pub fn find_remove_row(
    snapshot: &RowSnapshot,
    config: &EntryConfig,
    invoice: &str,
    account: &str,
) -> Option<u32> {
    snapshot.find(config.rows, |row_invoice, row_account| {
        row_invoice == invoice && row_account == account
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutVariant;
    use crate::test_support::{e2e_layout, entry_config, product, sheet_column};

    fn snapshot(invoices: &[&str], accounts: &[&str]) -> RowSnapshot {
        RowSnapshot::from_columns(vec![sheet_column(invoices), sheet_column(accounts)])
    }

    #[test]
    fn test_end_to_end_mapping_lands_on_row_five() {
        let layout = e2e_layout();
        let rows = map_sale_items(&layout, &[product("SKU1", 4)]);

        let bulk = rows.get(ProductType::Bulk).unwrap();
        assert!(bulk.has_entries);
        assert_eq!(bulk.with_identity("1001", "Acme"), vec!["1001", "Acme", "4", ""]);
        assert!(rows.skipped.is_empty());

        let empty = RowSnapshot::default();
        let config = layout.category(ProductType::Bulk).unwrap();
        assert_eq!(find_add_row(&empty, config, "1001", "Acme"), Some(5));
    }

    #[test]
    fn test_bulk_takes_precedence_over_retail() {
        let layout = SheetLayoutConfig::from_parts(
            LayoutVariant::Standard,
            vec![
                (ProductType::Retail, entry_config((22, 40), &[("SKU1", "D")])),
                (ProductType::Bulk, entry_config((5, 20), &[("SKU1", "C")])),
            ],
            entry_config((3, 40), &[("Monday", "A")]),
        )
        .unwrap();

        let rows = map_sale_items(&layout, &[product("SKU1", 2)]);
        let bulk = rows.get(ProductType::Bulk).unwrap();
        let retail = rows.get(ProductType::Retail).unwrap();

        assert_eq!(bulk.values[2], "2");
        assert!(bulk.has_entries);
        assert!(!retail.has_entries);
        assert!(retail.values.iter().all(String::is_empty));
        let with_entries: Vec<ProductType> = rows.with_entries().map(|(t, _)| t).collect();
        assert_eq!(with_entries, vec![ProductType::Bulk]);
    }

    #[test]
    fn test_unknown_skus_are_skipped() {
        let layout = e2e_layout();
        let rows = map_sale_items(&layout, &[product("SKU1", 1), product("MYSTERY", 3)]);
        assert_eq!(rows.skipped, vec![product("MYSTERY", 3)]);
    }

    #[test]
    fn test_add_row_skips_occupied_rows() {
        let config = entry_config((5, 8), &[("SKU1", "C")]);
        // Rows 1-4 are headers; rows 5 and 6 are taken by other orders.
        let snap = snapshot(
            &["Invoice", "", "", "", "900", "901"],
            &["Account", "", "", "", "Beta", "Gamma"],
        );
        assert_eq!(find_add_row(&snap, &config, "1001", "Acme"), Some(7));
    }

    #[test]
    fn test_add_row_reuses_existing_order_row() {
        let config = entry_config((5, 8), &[("SKU1", "C")]);
        let snap = snapshot(
            &["Invoice", "", "", "", "900", "1001"],
            &["Account", "", "", "", "Beta", "Acme"],
        );
        assert_eq!(find_add_row(&snap, &config, "1001", "Acme"), Some(6));
    }

    #[test]
    fn test_add_row_accepts_partially_filled_row() {
        let config = entry_config((5, 8), &[("SKU1", "C")]);
        let snap = snapshot(&["", "", "", "", "900"], &["", "", "", "", "  "]);
        assert_eq!(find_add_row(&snap, &config, "1001", "Acme"), Some(5));
    }

    #[test]
    fn test_add_row_none_when_band_full() {
        let config = entry_config((5, 7), &[("SKU1", "C")]);
        let snap = snapshot(&["", "", "", "", "900", "901"], &["", "", "", "", "Beta", "Gamma"]);
        assert_eq!(find_add_row(&snap, &config, "1001", "Acme"), None);
    }

    #[test]
    fn test_add_row_scan_is_idempotent() {
        let config = entry_config((5, 8), &[("SKU1", "C")]);
        let snap = snapshot(&["", "", "", "", "900"], &["", "", "", "", "Beta"]);
        let first = find_add_row(&snap, &config, "1001", "Acme");
        let second = find_add_row(&snap, &config, "1001", "Acme");
        assert_eq!(first, Some(6));
        assert_eq!(first, second);
    }

    #[test]
    fn test_remove_row_requires_exact_match() {
        let config = entry_config((5, 8), &[("SKU1", "C")]);
        let snap = snapshot(
            &["", "", "", "", "1001", "1001"],
            &["", "", "", "", "Acme Ltd", "Acme"],
        );
        assert_eq!(find_remove_row(&snap, &config, "1001", "Acme"), Some(6));
        assert_eq!(find_remove_row(&snap, &config, "1002", "Acme"), None);
        assert_eq!(find_remove_row(&RowSnapshot::default(), &config, "1001", "Acme"), None);
    }

    #[test]
    fn test_snapshot_range() {
        assert_eq!(snapshot_range("Monday"), "Monday!A:B");
    }
}
