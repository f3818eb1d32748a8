//! Spreadsheet column references.
//!
//! Converts between column letters ("A", "Z", "AA", "AB") and zero-based
//! indices, and formats the A1 ranges the sheet actions read and write.

use crate::error::ColumnError;

/// Convert column letters to a zero-based index (A = 0, Z = 25, AA = 26).
///
/// Letters are read as a bijective base-26 numeral, most significant first.
/// Lowercase letters are accepted.
pub fn column_to_index(reference: &str) -> Result<usize, ColumnError> {
    if reference.is_empty() {
        return Err(ColumnError::Empty);
    }

    let too_long = || ColumnError::TooLong(reference.to_string());

    // Accumulates `index + 1`, which can exceed `usize` by one for the widest
    // column.
    let mut ordinal: u128 = 0;
    for letter in reference.chars() {
        if !letter.is_ascii_alphabetic() {
            return Err(ColumnError::InvalidLetter {
                reference: reference.to_string(),
                letter,
            });
        }
        let digit = u128::from(letter.to_ascii_uppercase() as u8 - b'A') + 1;
        ordinal = ordinal
            .checked_mul(26)
            .and_then(|shifted| shifted.checked_add(digit))
            .ok_or_else(too_long)?;
    }

    usize::try_from(ordinal - 1).map_err(|_| too_long())
}

/// Convert a zero-based index back to column letters (0 = A, 27 = AB).
///
/// Defined for every `usize`, including `usize::MAX`.
pub fn index_to_column(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index as u128 + 1;

    while n > 0 {
        n -= 1;
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    letters.iter().rev().collect()
}

/// Single-cell A1 reference, e.g. `Entry!D7`.
pub fn cell_ref(sheet: &str, column: &str, row: u32) -> String {
    format!("{sheet}!{column}{row}")
}

/// One-row A1 range, e.g. `Monday!A5:AH5`.
pub fn row_range(sheet: &str, from: &str, to: &str, row: u32) -> String {
    format!("{sheet}!{from}{row}:{to}{row}")
}

/// One-column A1 range spanning `start..=end`, e.g. `Entry!D3:D40`.
pub fn column_range(sheet: &str, column: &str, start: u32, end: u32) -> String {
    format!("{sheet}!{column}{start}:{column}{end}")
}
