//! In-memory tabular data shared by the loader, executor and validator.

use serde::Deserialize;

use crate::core::normalize::{CellKind, classify};

/// A single table cell as produced by a parser or loaded from CSV.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Cell {
    /// Build a text cell, mapping the empty string to `Null` like a CSV reader would.
    pub fn from_csv_field(field: &str) -> Self {
        if field.is_empty() {
            Cell::Null
        } else {
            Cell::Text(field.to_string())
        }
    }

    /// Raw textual form, before any normalization.
    pub fn raw(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(value) => value.to_string(),
            Cell::Number(value) => value.to_string(),
            Cell::Text(value) => value.clone(),
        }
    }
}

/// Rectangular table: every row carries exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Return the index of the first row whose width differs from the header.
    pub fn first_ragged_row(&self) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.len() != self.columns.len())
    }

    /// Infer a coarse kind per column from its non-empty cells.
    ///
    /// A column is `Number` or `Date` only if every non-empty cell classifies that way.
    pub fn column_kinds(&self) -> Vec<CellKind> {
        (0..self.columns.len())
            .map(|idx| {
                let mut kind: Option<CellKind> = None;
                for row in &self.rows {
                    let cell_kind = classify(&row[idx]);
                    if cell_kind == CellKind::Empty {
                        continue;
                    }
                    kind = match kind {
                        None => Some(cell_kind),
                        Some(prev) if prev == cell_kind => Some(prev),
                        Some(_) => Some(CellKind::Text),
                    };
                }
                kind.unwrap_or(CellKind::Empty)
            })
            .collect()
    }

    /// Render the header and the first `limit` rows as CSV text.
    pub fn preview_csv(&self, limit: usize) -> String {
        let mut out = String::new();
        out.push_str(&join_csv_line(self.columns.iter().map(String::as_str)));
        out.push('\n');
        for row in self.rows.iter().take(limit) {
            let raw: Vec<String> = row.iter().map(Cell::raw).collect();
            out.push_str(&join_csv_line(raw.iter().map(String::as_str)));
            out.push('\n');
        }
        out
    }
}

fn join_csv_line<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields.map(quote_csv_field).collect::<Vec<_>>().join(",")
}

fn quote_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    #[test]
    fn cells_deserialize_from_json_scalars() {
        let cells: Vec<Cell> =
            serde_json::from_str(r#"[null, true, 12.5, "x"]"#).expect("parse cells");
        assert_eq!(cells[0], Cell::Null);
        assert_eq!(cells[1], Cell::Bool(true));
        assert_eq!(cells[2].raw(), "12.5");
        assert_eq!(cells[3], text("x"));
    }

    #[test]
    fn empty_csv_field_is_null() {
        assert_eq!(Cell::from_csv_field(""), Cell::Null);
        assert_eq!(Cell::from_csv_field(" "), text(" "));
    }

    #[test]
    fn ragged_row_is_reported() {
        let table = Table::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![text("1"), text("2")], vec![text("3")]],
        );
        assert_eq!(table.first_ragged_row(), Some(1));
    }

    #[test]
    fn column_kinds_fall_back_to_text_on_mixed_values() {
        let table = Table::new(
            vec!["Date".to_string(), "Amount".to_string(), "Note".to_string()],
            vec![
                vec![text("01-08-2024"), text("1,000.00"), Cell::Null],
                vec![text("02-08-2024"), Cell::Null, text("12")],
                vec![text("03-08-2024"), text("5"), text("rent")],
            ],
        );
        assert_eq!(
            table.column_kinds(),
            vec![CellKind::Date, CellKind::Number, CellKind::Text]
        );
    }

    #[test]
    fn preview_quotes_fields_with_commas() {
        let table = Table::new(
            vec!["Description".to_string(), "Balance".to_string()],
            vec![
                vec![text("Salary, August"), text("1,000.00")],
                vec![text("ignored"), text("0")],
            ],
        );
        assert_eq!(
            table.preview_csv(1),
            "Description,Balance\n\"Salary, August\",\"1,000.00\"\n"
        );
    }
}
