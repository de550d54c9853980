//! Sample loader: locates a bank's sample PDF and expected table on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::table::{Cell, Table};
use crate::core::types::FatalCondition;
use crate::io::config::AgentConfig;

/// A named bank whose sample PDF and expected table define one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub sample_pdf_path: PathBuf,
    pub expected_csv_path: PathBuf,
    pub output_parser_path: PathBuf,
    /// Every location checked for the PDF, in lookup order.
    pub pdf_candidates: Vec<PathBuf>,
}

impl Target {
    /// Resolve a target by convention under `root`.
    ///
    /// The PDF is looked up as `<bank>_sample.pdf` and then `<bank> sample.pdf`; the
    /// first existing candidate wins, falling back to the canonical name.
    pub fn resolve(root: &Path, name: &str, config: &AgentConfig) -> Result<Self, SampleError> {
        if !is_valid_target_name(name) {
            return Err(SampleError::InvalidTarget {
                name: name.to_string(),
            });
        }
        let bank_dir = root.join(&config.data_dir).join(name);
        let pdf_candidates = vec![
            bank_dir.join(format!("{name}_sample.pdf")),
            bank_dir.join(format!("{name} sample.pdf")),
        ];
        let sample_pdf_path = pdf_candidates
            .iter()
            .find(|path| path.is_file())
            .unwrap_or(&pdf_candidates[0])
            .clone();
        Ok(Self {
            name: name.to_string(),
            sample_pdf_path,
            expected_csv_path: bank_dir.join("result.csv"),
            output_parser_path: root
                .join(&config.parsers_dir)
                .join(format!("{name}_parser.py")),
            pdf_candidates,
        })
    }
}

/// Target names become path components, so only a conservative alphabet is accepted.
pub fn is_valid_target_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Inputs for one run, read from disk.
#[derive(Debug, Clone)]
pub struct Sample {
    pub pdf_path: PathBuf,
    pub expected: Table,
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("invalid target name '{name}'")]
    InvalidTarget { name: String },
    #[error("missing sample files for '{bank}': {}", display_paths(.missing))]
    MissingSample { bank: String, missing: Vec<PathBuf> },
    #[error("malformed expected table {}: {reason}", .path.display())]
    MalformedExpectedTable { path: PathBuf, reason: String },
}

impl SampleError {
    pub fn into_fatal(self) -> FatalCondition {
        match self {
            SampleError::InvalidTarget { name } => FatalCondition::InvalidTarget { name },
            SampleError::MissingSample { bank, missing } => FatalCondition::MissingSample {
                bank,
                searched: missing,
            },
            SampleError::MalformedExpectedTable { path, reason } => {
                FatalCondition::MalformedExpectedTable { path, reason }
            }
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the sample PDF location and the expected table. Reads only.
#[instrument(skip_all, fields(bank = %target.name))]
pub fn load_sample(target: &Target) -> Result<Sample, SampleError> {
    let mut missing = Vec::new();
    if !target.sample_pdf_path.is_file() {
        missing.extend(target.pdf_candidates.iter().cloned());
    }
    if !target.expected_csv_path.is_file() {
        missing.push(target.expected_csv_path.clone());
    }
    if !missing.is_empty() {
        return Err(SampleError::MissingSample {
            bank: target.name.clone(),
            missing,
        });
    }

    let expected = read_expected_table(&target.expected_csv_path)?;
    debug!(
        columns = expected.columns.len(),
        rows = expected.row_count(),
        "expected table loaded"
    );
    Ok(Sample {
        pdf_path: target.sample_pdf_path.clone(),
        expected,
    })
}

/// Parse a CSV file with a header row into a [`Table`].
pub fn read_expected_table(path: &Path) -> Result<Table, SampleError> {
    let malformed = |reason: String| SampleError::MalformedExpectedTable {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|err| malformed(err.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|err| malformed(err.to_string()))?
        .clone();
    let columns: Vec<String> = headers
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(malformed("missing header row".to_string()));
    }
    if let Some(idx) = columns.iter().position(String::is_empty) {
        return Err(malformed(format!("column {} has an empty name", idx + 1)));
    }
    let mut seen = BTreeSet::new();
    for column in &columns {
        if !seen.insert(column.as_str()) {
            return Err(malformed(format!("duplicate column '{column}'")));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| malformed(err.to_string()))?;
        rows.push(record.iter().map(Cell::from_csv_field).collect());
    }

    Ok(Table::new(columns, rows))
}
