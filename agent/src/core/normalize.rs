//! Cell canonicalization used by the validator.
//!
//! Two cells are considered equal when their canonical forms match. The rules
//! are symmetric, so the same function is applied to expected and actual cells:
//!
//! - surrounding whitespace is trimmed;
//! - `null`, the empty string and `nan` all become the empty string;
//! - dates in common statement formats become `YYYY-MM-DD`;
//! - numbers (JSON numbers or text with thousands separators) become a
//!   trailing-zero-free decimal, so `"1,234.50"` and `1234.5` agree.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::core::table::Cell;

/// Day-first layouts are tried before ISO; statements from the target banks are day-first.
const DATE_FORMATS: &[&str] = &[
    "%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%Y/%m/%d", "%d-%b-%Y", "%d %b %Y", "%d-%b-%y", "%d.%m.%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Coarse kind of a cell after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Empty,
    Date,
    Number,
    Text,
}

impl CellKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CellKind::Empty => "empty",
            CellKind::Date => "date",
            CellKind::Number => "number",
            CellKind::Text => "text",
        }
    }
}

/// Canonical string form of a cell.
pub fn canonical(cell: &Cell) -> String {
    canonical_with_kind(cell).0
}

/// Kind of a cell under the same rules as [`canonical`].
pub fn classify(cell: &Cell) -> CellKind {
    canonical_with_kind(cell).1
}

fn canonical_with_kind(cell: &Cell) -> (String, CellKind) {
    match cell {
        Cell::Null => (String::new(), CellKind::Empty),
        Cell::Bool(value) => (value.to_string(), CellKind::Text),
        Cell::Number(value) => match canonical_number(&value.to_string()) {
            Some(number) => (number, CellKind::Number),
            None => (value.to_string(), CellKind::Text),
        },
        Cell::Text(value) => canonical_text(value),
    }
}

fn canonical_text(raw: &str) -> (String, CellKind) {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed == "NaT" {
        return (String::new(), CellKind::Empty);
    }
    if let Some(date) = canonical_date(trimmed) {
        return (date, CellKind::Date);
    }
    if let Some(number) = canonical_number(trimmed) {
        return (number, CellKind::Number);
    }
    (trimmed.to_string(), CellKind::Text)
}

/// Parse a date or midnight datetime into ISO `YYYY-MM-DD`.
///
/// Datetimes with a non-midnight time keep their time component as `YYYY-MM-DDTHH:MM:SS`.
pub fn canonical_date(raw: &str) -> Option<String> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            if datetime.time() == NaiveTime::MIN {
                return Some(datetime.date().format("%Y-%m-%d").to_string());
            }
            return Some(datetime.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    None
}

/// Parse a number written with optional sign and thousands separators.
pub fn canonical_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let value = Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()?;
    Some(value.normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    fn number(value: f64) -> Cell {
        Cell::Number(serde_json::Number::from_f64(value).expect("finite"))
    }

    #[test]
    fn thousands_separated_text_matches_json_number() {
        assert_eq!(canonical(&text("1,234.50")), canonical(&number(1234.5)));
        assert_eq!(canonical(&text("1,234.50")), "1234.5");
    }

    #[test]
    fn integers_and_floats_agree() {
        assert_eq!(canonical(&text("5")), canonical(&number(5.0)));
        assert_eq!(canonical(&text("+5.00")), "5");
    }

    #[test]
    fn blanks_and_nan_are_empty() {
        assert_eq!(canonical(&Cell::Null), "");
        assert_eq!(canonical(&text("  ")), "");
        assert_eq!(canonical(&text("NaN")), "");
        assert_eq!(classify(&text("nan")), CellKind::Empty);
    }

    #[test]
    fn dates_collapse_to_iso() {
        assert_eq!(canonical(&text("01-08-2024")), "2024-08-01");
        assert_eq!(canonical(&text("01/08/2024")), "2024-08-01");
        assert_eq!(canonical(&text("2024-08-01")), "2024-08-01");
        assert_eq!(canonical(&text("2024-08-01T00:00:00")), "2024-08-01");
        assert_eq!(canonical(&text("2024-08-01 00:00:00")), "2024-08-01");
        assert_eq!(canonical(&text("01-Aug-2024")), "2024-08-01");
    }

    #[test]
    fn datetimes_with_time_keep_the_time() {
        assert_eq!(
            canonical(&text("2024-08-01 10:30:00")),
            "2024-08-01T10:30:00"
        );
    }

    #[test]
    fn text_is_trimmed_but_otherwise_untouched() {
        assert_eq!(canonical(&text("  UPI Transfer ")), "UPI Transfer");
        assert_eq!(classify(&text("UPI Transfer")), CellKind::Text);
        assert_eq!(canonical(&text("-")), "-");
    }
}
