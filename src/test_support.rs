//! Shared fixtures and in-memory fakes for unit tests.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::columns::{column_to_index, index_to_column};
use crate::error::ApiError;
use crate::inventory::{
    Invoice, InventoryApi, Product, SaleFilter, SaleOrder, SaleSnapshot, SaleSummary,
};
use crate::layout::{EntryConfig, LayoutVariant, ProductType, SheetLayoutConfig};
use crate::sheets::{MajorDimension, SheetsApi};

// ---------------------------------------------------------------------------
// Layout fixtures
// ---------------------------------------------------------------------------

pub fn sheet_column(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// Column-major values of a realistic `Automation` sheet.
pub fn layout_values(with_one_kilo: bool) -> Vec<Vec<String>> {
    let mut values = vec![
        sheet_column(&["Bulk rows 5-20", "SKU", "BULK-A", "BULK-B"]),
        sheet_column(&["Retail rows 22-40", "SKU", "RET-A", "RET-B", "RET-C"]),
        sheet_column(&["Sample rows 42-50", "SKU", "SAM-A"]),
        sheet_column(&["", "Column", "C", "D", "E"]),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
        sheet_column(&[
            "Entry rows 3-40",
            "Day",
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
        ]),
        sheet_column(&["", "Column", "A", "B", "C", "D", "E"]),
    ];
    if with_one_kilo {
        values.insert(1, sheet_column(&["1kg rows 60-70", "SKU", "KILO-A"]));
    }
    values
}

pub fn entry_config(rows: (u32, u32), columns: &[(&str, &str)]) -> EntryConfig {
    EntryConfig {
        rows,
        columns: columns
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// `bulk` rows `[5, 8)` with `SKU1 -> C`; Monday and Tuesday entry columns.
pub fn e2e_layout() -> SheetLayoutConfig {
    SheetLayoutConfig::from_parts(
        LayoutVariant::Standard,
        vec![(ProductType::Bulk, entry_config((5, 8), &[("SKU1", "C")]))],
        entry_config((3, 6), &[("Monday", "A"), ("Tuesday", "B")]),
    )
    .expect("e2e layout")
}

// ---------------------------------------------------------------------------
// Sale fixtures
// ---------------------------------------------------------------------------

pub fn product(sku: &str, quantity: u32) -> Product {
    Product {
        product_id: format!("p-{sku}"),
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        quantity,
    }
}

pub fn sale_snapshot(
    id: &str,
    customer: &str,
    invoice: &str,
    items: &[(&str, u32)],
) -> SaleSnapshot {
    SaleSnapshot {
        id: id.to_string(),
        customer: customer.to_string(),
        customer_id: format!("c-{customer}"),
        customer_reference: None,
        invoices: vec![Invoice {
            invoice_number: invoice.to_string(),
        }],
        order: Some(SaleOrder {
            lines: items.iter().map(|(sku, q)| product(sku, *q)).collect(),
        }),
        note: String::new(),
        sale_order_date: "2021-03-07T00:00:00".to_string(),
        status: "ORDERED".to_string(),
        shipping_address: json!({ "City": "Toronto" }),
        fulfilments: Vec::new(),
    }
}

/// Minimal sale with an explicit order date.
pub fn dated_sale(id: &str, order_date: &str) -> SaleSnapshot {
    let mut sale = sale_snapshot(id, &format!("Customer {id}"), &format!("INV-{id}"), &[]);
    sale.sale_order_date = order_date.to_string();
    sale
}

// ---------------------------------------------------------------------------
// Fake spreadsheet
// ---------------------------------------------------------------------------

/// Parsed A1 range. `None` bounds are open.
#[derive(Debug, Clone, Copy)]
struct Region {
    first_col: usize,
    last_col: Option<usize>,
    first_row: usize,
    last_row: Option<usize>,
}

fn split_range(range: &str) -> (&str, Option<&str>) {
    match range.split_once('!') {
        Some((sheet, cells)) => (sheet, Some(cells)),
        None => (range, None),
    }
}

/// `"C7"` -> (2, Some(6)); `"C"` -> (2, None). Zero-based.
fn parse_cell(cell: &str) -> (usize, Option<usize>) {
    let letters: String = cell.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &cell[letters.len()..];
    let col = column_to_index(&letters).expect("fake sheet column");
    let row = (!digits.is_empty()).then(|| digits.parse::<usize>().expect("fake sheet row") - 1);
    (col, row)
}

fn parse_region(cells: Option<&str>) -> Region {
    let Some(cells) = cells else {
        return Region {
            first_col: 0,
            last_col: None,
            first_row: 0,
            last_row: None,
        };
    };
    let (from, to) = cells.split_once(':').unwrap_or((cells, cells));
    let (first_col, first_row) = parse_cell(from);
    let (last_col, last_row) = parse_cell(to);
    Region {
        first_col,
        last_col: Some(last_col),
        first_row: first_row.unwrap_or(0),
        last_row: last_row.or(if from == to { first_row } else { None }),
    }
}

fn trim_trailing(vectors: &mut Vec<Vec<String>>) {
    for vector in vectors.iter_mut() {
        while vector.last().is_some_and(String::is_empty) {
            vector.pop();
        }
    }
    while vectors.last().is_some_and(Vec::is_empty) {
        vectors.pop();
    }
}

/// Row-major in-memory spreadsheet implementing [`SheetsApi`].
#[derive(Default)]
pub struct FakeSheets {
    grids: Mutex<HashMap<String, Vec<Vec<String>>>>,
    failing_writes: Mutex<Vec<String>>,
    failing_reads: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, Vec<String>)>>,
    reads: Mutex<Vec<String>>,
}

impl FakeSheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a sheet from column-major values.
    pub fn with_columns(self, sheet: &str, columns: Vec<Vec<String>>) -> Self {
        {
            let mut grids = self.grids.lock().unwrap();
            let grid = grids.entry(sheet.to_string()).or_default();
            for (col, column) in columns.into_iter().enumerate() {
                for (row, value) in column.into_iter().enumerate() {
                    set_cell(grid, row, col, value);
                }
            }
        }
        self
    }

    pub fn set(&self, sheet: &str, cell: &str, value: &str) {
        let (col, row) = parse_cell(cell);
        let mut grids = self.grids.lock().unwrap();
        let grid = grids.entry(sheet.to_string()).or_default();
        set_cell(grid, row.expect("cell row"), col, value.to_string());
    }

    /// Cell text, `""` when never written.
    pub fn cell(&self, sheet: &str, cell: &str) -> String {
        let (col, row) = parse_cell(cell);
        let grids = self.grids.lock().unwrap();
        grids
            .get(sheet)
            .and_then(|grid| grid.get(row.expect("cell row")))
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    /// One row, padded to `len`.
    pub fn row(&self, sheet: &str, row: usize, len: usize) -> Vec<String> {
        (0..len)
            .map(|col| self.cell(sheet, &format!("{}{row}", index_to_column(col))))
            .collect()
    }

    /// Writes whose range starts with `prefix` fail with HTTP 500.
    pub fn fail_writes_to(&self, prefix: &str) {
        self.failing_writes.lock().unwrap().push(prefix.to_string());
    }

    pub fn fail_reads_of(&self, prefix: &str) {
        self.failing_reads.lock().unwrap().push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing_writes.lock().unwrap().clear();
        self.failing_reads.lock().unwrap().clear();
    }

    pub fn writes(&self) -> Vec<(String, Vec<String>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    fn check(&self, failing: &Mutex<Vec<String>>, range: &str) -> Result<(), ApiError> {
        if failing
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| range.starts_with(prefix.as_str()))
        {
            return Err(ApiError::Status {
                service: "Google Sheets",
                status: 500,
                message: format!("injected failure for {range}"),
            });
        }
        Ok(())
    }
}

fn set_cell(grid: &mut Vec<Vec<String>>, row: usize, col: usize, value: String) {
    if grid.len() <= row {
        grid.resize(row + 1, Vec::new());
    }
    let cells = &mut grid[row];
    if cells.len() <= col {
        cells.resize(col + 1, String::new());
    }
    cells[col] = value;
}

impl SheetsApi for FakeSheets {
    async fn get_values(
        &self,
        range: &str,
        dimension: MajorDimension,
    ) -> Result<Vec<Vec<String>>, ApiError> {
        self.reads.lock().unwrap().push(range.to_string());
        self.check(&self.failing_reads, range)?;

        let (sheet, cells) = split_range(range);
        let region = parse_region(cells);
        let grids = self.grids.lock().unwrap();
        let empty = Vec::new();
        let grid = grids.get(sheet).unwrap_or(&empty);

        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let last_row = region.last_row.unwrap_or(grid.len().saturating_sub(1));
        let last_col = region.last_col.unwrap_or(width.saturating_sub(1));
        let cell = |row: usize, col: usize| {
            grid.get(row)
                .and_then(|r| r.get(col))
                .cloned()
                .unwrap_or_default()
        };

        let mut values: Vec<Vec<String>> = match dimension {
            MajorDimension::Rows => (region.first_row..=last_row)
                .map(|row| (region.first_col..=last_col).map(|col| cell(row, col)).collect())
                .collect(),
            MajorDimension::Columns => (region.first_col..=last_col)
                .map(|col| (region.first_row..=last_row).map(|row| cell(row, col)).collect())
                .collect(),
        };
        if grid.is_empty() {
            values.clear();
        }
        trim_trailing(&mut values);
        Ok(values)
    }

    async fn update_values(&self, range: &str, row: &[String]) -> Result<(), ApiError> {
        self.check(&self.failing_writes, range)?;
        let (sheet, cells) = split_range(range);
        let region = parse_region(cells);
        {
            let mut grids = self.grids.lock().unwrap();
            let grid = grids.entry(sheet.to_string()).or_default();
            for (offset, value) in row.iter().enumerate() {
                set_cell(grid, region.first_row, region.first_col + offset, value.clone());
            }
        }
        self.writes
            .lock()
            .unwrap()
            .push((range.to_string(), row.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake inventory
// ---------------------------------------------------------------------------

/// In-memory inventory API with call recording and failure injection.
#[derive(Default)]
pub struct FakeInventory {
    sales: Mutex<HashMap<String, SaleSnapshot>>,
    awaiting: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    fetch_calls: Mutex<Vec<String>>,
    fulfilment_calls: Mutex<Vec<(&'static str, Value)>>,
    fetch_delay: Option<Duration>,
    fetch_hook: Mutex<Option<FetchHook>>,
}

type FetchHook = Box<dyn Fn(&str) + Send>;

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long (use with a paused clock).
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Register sales and mark them awaiting fulfilment, in order.
    pub fn with_sales(self, sales: Vec<SaleSnapshot>) -> Self {
        self.set_awaiting(sales.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().as_slice());
        for sale in sales {
            self.insert(sale);
        }
        self
    }

    pub fn insert(&self, sale: SaleSnapshot) {
        self.sales.lock().unwrap().insert(sale.id.clone(), sale);
    }

    pub fn set_awaiting(&self, ids: &[&str]) {
        *self.awaiting.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
    }

    /// Run `hook` with the sale ID at the start of every fetch.
    pub fn on_fetch(&self, hook: impl Fn(&str) + Send + 'static) {
        *self.fetch_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fail_fetch(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn fulfilment_calls(&self) -> Vec<(&'static str, Value)> {
        self.fulfilment_calls.lock().unwrap().clone()
    }

    fn record(&self, step: &'static str, body: &Value) {
        self.fulfilment_calls.lock().unwrap().push((step, body.clone()));
    }
}

impl InventoryApi for FakeInventory {
    async fn list_sales(&self, _filter: &SaleFilter) -> Result<Vec<SaleSummary>, ApiError> {
        let awaiting = self.awaiting.lock().unwrap().clone();
        Ok(awaiting
            .into_iter()
            .map(|id| SaleSummary {
                id,
                customer: String::new(),
                order_number: String::new(),
                status: "AUTHORISED".into(),
            })
            .collect())
    }

    async fn fetch_sale(&self, id: &str) -> Result<SaleSnapshot, ApiError> {
        self.fetch_calls.lock().unwrap().push(id.to_string());
        if let Some(hook) = self.fetch_hook.lock().unwrap().as_ref() {
            hook(id);
        }
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(ApiError::Status {
                service: "inventory API",
                status: 500,
                message: format!("injected failure for {id}"),
            });
        }
        self.sales
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                service: "inventory API",
                status: 404,
                message: format!("sale {id} not found"),
            })
    }

    async fn pick(&self, body: &Value) -> Result<Value, ApiError> {
        self.record("pick", body);
        Ok(json!({
            "TaskID": body["TaskID"],
            "Status": "PICKED",
            "Lines": [{ "ProductID": "p-SKU1", "Quantity": 4 }]
        }))
    }

    async fn pack(&self, body: &Value) -> Result<Value, ApiError> {
        self.record("pack", body);
        Ok(json!({ "TaskID": body["TaskID"], "Status": "PACKED", "Lines": body["Lines"] }))
    }

    async fn ship(&self, body: &Value) -> Result<Value, ApiError> {
        self.record("ship", body);
        Ok(json!({ "TaskID": body["TaskID"], "Status": "AUTHORISED" }))
    }
}
