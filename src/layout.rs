//! `Automation` sheet layout parsing.
//!
//! The layout sheet is read column-major. Every block occupies one column:
//! row 0 is a header carrying the block's row range ("Bulk rows 5 - 20"),
//! row 1 is a label, and the block's keys start at row 2. Product blocks list
//! SKUs and share one "coffee columns" block that assigns each SKU position
//! its day-sheet column; the entry block lists weekdays and is paired with
//! its own column block.
//!
//! Two layouts exist in the wild: with and without a "1kg" product block.
//! The variant is detected once from the header of column 1 and selects one
//! of two static offset tables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::columns::{column_to_index, index_to_column};
use crate::error::LayoutError;

/// Name of the layout sheet inside the spreadsheet.
pub const LAYOUT_SHEET: &str = "Automation";

/// Name of the entry (weekday destination) sheet.
pub const ENTRY_SHEET: &str = "Entry";

/// First row inside a block column that holds a key.
const FIRST_KEY_ROW: usize = 2;

/// Header marker identifying the optional one-kilo block.
const ONE_KILO_MARKER: &str = "1kg";

// ---------------------------------------------------------------------------
// Product types
// ---------------------------------------------------------------------------

/// Day-sheet product category. Declaration order is the lookup precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProductType {
    Bulk,
    OneKilo,
    Retail,
    Sample,
}

impl ProductType {
    /// All categories in precedence order.
    pub const ALL: [ProductType; 4] = [
        ProductType::Bulk,
        ProductType::OneKilo,
        ProductType::Retail,
        ProductType::Sample,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Bulk => "bulk",
            ProductType::OneKilo => "oneKilo",
            ProductType::Retail => "retail",
            ProductType::Sample => "sample",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entry config
// ---------------------------------------------------------------------------

/// A row range plus a key -> column letter map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryConfig {
    /// `[start, end)`, 1-based sheet rows.
    pub rows: (u32, u32),
    pub columns: HashMap<String, String>,
}

impl EntryConfig {
    pub fn start(&self) -> u32 {
        self.rows.0
    }

    pub fn end(&self) -> u32 {
        self.rows.1
    }

    pub fn column(&self, key: &str) -> Option<&str> {
        self.columns.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Layout variants
// ---------------------------------------------------------------------------

/// Which of the two known layouts a spreadsheet uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutVariant {
    Standard,
    WithOneKilo,
}

/// Column offsets of every block for one layout variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockOffsets {
    bulk: usize,
    one_kilo: Option<usize>,
    retail: usize,
    sample: usize,
    coffee_columns: usize,
    entry_keys: usize,
    entry_columns: usize,
}

const STANDARD_OFFSETS: BlockOffsets = BlockOffsets {
    bulk: 0,
    one_kilo: None,
    retail: 1,
    sample: 2,
    coffee_columns: 3,
    entry_keys: 9,
    entry_columns: 10,
};

const ONE_KILO_OFFSETS: BlockOffsets = BlockOffsets {
    bulk: 0,
    one_kilo: Some(1),
    retail: 2,
    sample: 3,
    coffee_columns: 4,
    entry_keys: 10,
    entry_columns: 11,
};

impl LayoutVariant {
    /// Detect the variant from the header of column 1.
    pub fn detect(values: &[Vec<String>]) -> Self {
        let header = values
            .get(1)
            .and_then(|column| column.first())
            .map(|h| {
                h.chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_lowercase()
            })
            .unwrap_or_default();

        if header.contains(ONE_KILO_MARKER) {
            LayoutVariant::WithOneKilo
        } else {
            LayoutVariant::Standard
        }
    }

    fn offsets(self) -> &'static BlockOffsets {
        match self {
            LayoutVariant::Standard => &STANDARD_OFFSETS,
            LayoutVariant::WithOneKilo => &ONE_KILO_OFFSETS,
        }
    }
}

// ---------------------------------------------------------------------------
// Sheet layout
// ---------------------------------------------------------------------------

/// Parsed layout of one production spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetLayoutConfig {
    pub variant: LayoutVariant,
    categories: Vec<(ProductType, EntryConfig)>,
    pub entry: EntryConfig,
    /// One column past the rightmost product column.
    pub max_column: String,
    /// Length of a day-sheet row vector (`A..=max_column`).
    pub row_length: usize,
}

impl SheetLayoutConfig {
    /// Parse the column-major values of the layout sheet.
    pub fn parse(values: &[Vec<String>]) -> Result<Self, LayoutError> {
        let variant = LayoutVariant::detect(values);
        let offsets = variant.offsets();

        let coffee_columns = block_keys(values, "coffee columns", offsets.coffee_columns)?;

        let mut blocks = vec![(ProductType::Bulk, offsets.bulk)];
        if let Some(one_kilo) = offsets.one_kilo {
            blocks.push((ProductType::OneKilo, one_kilo));
        }
        blocks.push((ProductType::Retail, offsets.retail));
        blocks.push((ProductType::Sample, offsets.sample));

        let mut categories = Vec::with_capacity(blocks.len());
        for (product_type, index) in blocks {
            let block = product_type.as_str();
            let column = block_column(values, block, index)?;
            let config = parse_entry_config(block, column, &coffee_columns)?;
            categories.push((product_type, config));
        }

        let entry_keys = block_column(values, "entry", offsets.entry_keys)?;
        let entry_columns = block_keys(values, "entry columns", offsets.entry_columns)?;
        let entry = parse_entry_config("entry", entry_keys, &entry_columns)?;

        Self::from_parts(variant, categories, entry)
    }

    /// Build a layout from already-typed parts. Row ranges must be
    /// non-empty and start at row 1 or later.
    pub fn from_parts(
        variant: LayoutVariant,
        mut categories: Vec<(ProductType, EntryConfig)>,
        entry: EntryConfig,
    ) -> Result<Self, LayoutError> {
        for (product_type, config) in &categories {
            check_row_range(product_type.as_str(), config.rows)?;
        }
        check_row_range("entry", entry.rows)?;

        let last_index = categories
            .iter()
            .flat_map(|(_, config)| config.columns.values())
            .filter_map(|column| column_to_index(column).ok())
            .max()
            .ok_or(LayoutError::NoCategoryColumns)?;

        categories.sort_by_key(|(t, _)| *t);

        Ok(Self {
            variant,
            categories,
            entry,
            max_column: index_to_column(last_index + 1),
            row_length: last_index + 2,
        })
    }

    /// Config for one product type, if the layout has that block.
    pub fn category(&self, product_type: ProductType) -> Option<&EntryConfig> {
        self.categories
            .iter()
            .find(|(t, _)| *t == product_type)
            .map(|(_, config)| config)
    }

    /// Configured categories in precedence order.
    pub fn categories(&self) -> impl Iterator<Item = (ProductType, &EntryConfig)> {
        self.categories.iter().map(|(t, config)| (*t, config))
    }

    pub fn has_product(&self, sku: &str) -> bool {
        self.categories
            .iter()
            .any(|(_, config)| config.columns.contains_key(sku))
    }

    /// Entry-sheet column for a weekday.
    pub fn entry_column(&self, weekday: &str) -> Option<&str> {
        self.entry.column(weekday)
    }

    /// Weekdays that have an entry-sheet column.
    pub fn weekdays(&self) -> Vec<String> {
        let mut days: Vec<String> = self.entry.columns.keys().cloned().collect();
        days.sort_by_key(|day| weekday_rank(day));
        days
    }
}

fn weekday_rank(day: &str) -> usize {
    const DAYS: [&str; 7] = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];
    let lower = day.to_lowercase();
    DAYS.iter().position(|d| *d == lower).unwrap_or(DAYS.len())
}

// ---------------------------------------------------------------------------
// Block parsing helpers
// ---------------------------------------------------------------------------

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit-run pattern is valid"))
}

fn block_column<'a>(
    values: &'a [Vec<String>],
    block: &'static str,
    index: usize,
) -> Result<&'a [String], LayoutError> {
    values
        .get(index)
        .filter(|column| !column.is_empty())
        .map(Vec::as_slice)
        .ok_or(LayoutError::MissingBlock { block, index })
}

/// Keys of a block that has no header of its own (column lists).
fn block_keys(
    values: &[Vec<String>],
    block: &'static str,
    index: usize,
) -> Result<Vec<String>, LayoutError> {
    let column = block_column(values, block, index)?;
    Ok(column.iter().skip(FIRST_KEY_ROW).cloned().collect())
}

/// Extract `[start, end)` from the first two digit runs of a header.
fn parse_row_range(block: &'static str, header: &str) -> Result<(u32, u32), LayoutError> {
    let mut numbers = digit_runs()
        .find_iter(header)
        .map(|m| m.as_str().parse::<u32>());

    let missing = || LayoutError::MissingRowRange {
        block,
        header: header.to_string(),
    };

    let start = numbers.next().ok_or_else(missing)?.map_err(|_| missing())?;
    let end = numbers.next().ok_or_else(missing)?.map_err(|_| missing())?;

    check_row_range(block, (start, end))?;
    Ok((start, end))
}

fn check_row_range(block: &'static str, (start, end): (u32, u32)) -> Result<(), LayoutError> {
    if start == 0 || start >= end {
        return Err(LayoutError::InvalidRowRange { block, start, end });
    }
    Ok(())
}

/// Pair a block's keys with a column list positionally.
///
/// Pairing truncates to the shorter list. Pairs with a blank key or column
/// are ignored; a later duplicate key overwrites an earlier one.
fn parse_entry_config(
    block: &'static str,
    column: &[String],
    column_letters: &[String],
) -> Result<EntryConfig, LayoutError> {
    let header = column.first().map(String::as_str).unwrap_or_default();
    let rows = parse_row_range(block, header)?;

    let mut columns = HashMap::new();
    for (key, letter) in column.iter().skip(FIRST_KEY_ROW).zip(column_letters) {
        let key = key.trim();
        let letter = letter.trim();
        if key.is_empty() || letter.is_empty() {
            continue;
        }
        column_to_index(letter).map_err(|source| LayoutError::InvalidColumn {
            block,
            key: key.to_string(),
            source,
        })?;
        columns.insert(key.to_string(), letter.to_ascii_uppercase());
    }

    Ok(EntryConfig { rows, columns })
}
