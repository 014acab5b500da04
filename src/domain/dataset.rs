use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;

/// A rectangular grid of display text with a header row, the shape both the
/// spreadsheet collaborator and the market report hand us.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Result of reading one cell as a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericCell {
    Absent,
    Value(f64),
    Invalid,
}

impl NumericCell {
    pub fn value(self) -> Option<f64> {
        match self {
            NumericCell::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub converted: usize,
    pub failed: usize,
}

/// Parses sheet-style numbers: surrounding whitespace, thousands spaces and a
/// decimal comma are accepted ("1 234,50" == 1234.5).
pub fn parse_decimal(raw: &str) -> NumericCell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NumericCell::Absent;
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => NumericCell::Value(v),
        _ => NumericCell::Invalid,
    }
}

/// Canonical display text for a number: integers without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Dataset {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Appends a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Reads CSV with a header row. Repeated header names are disambiguated with
    /// numeric suffixes (`PRICE`, `PRICE.1`, `PRICE.2`) so every column stays addressable.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let raw_headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mut dataset = Dataset::new(dedupe_headers(raw_headers));

        for record in csv_reader.records() {
            let record = record?;
            dataset.push_row(record.iter().map(str::to_string).collect());
        }

        Ok(dataset)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| crate::utils::error::RepricerError::IoError(e.into_error()))
    }

    /// Keeps only the named columns that exist, in the given order. Returns the
    /// names that were requested but absent.
    pub fn select_columns(&self, names: &[String]) -> (Dataset, Vec<String>) {
        let mut missing = Vec::new();
        let mut indices = Vec::new();
        let mut headers = Vec::new();
        for name in names {
            match self.column_index(name) {
                Some(idx) => {
                    indices.push(idx);
                    headers.push(name.clone());
                }
                None => missing.push(name.clone()),
            }
        }

        let mut selected = Dataset::new(headers);
        for row_idx in 0..self.rows.len() {
            selected.push_row(
                indices
                    .iter()
                    .map(|&col| self.cell(row_idx, col).to_string())
                    .collect(),
            );
        }
        (selected, missing)
    }

    /// Rewrites the given columns as canonical numbers. Cells that are blank or do
    /// not parse are left untouched.
    pub fn normalize_numeric(&mut self, columns: &[String]) -> HashMap<String, ConversionStats> {
        let mut stats = HashMap::new();
        for column in columns {
            let Some(col) = self.column_index(column) else {
                tracing::warn!("Numeric column '{}' is not present in the dataset", column);
                continue;
            };

            let entry: &mut ConversionStats = stats.entry(column.clone()).or_default();
            for row in self.rows.iter_mut() {
                let Some(cell) = row.get_mut(col) else {
                    continue;
                };
                match parse_decimal(cell) {
                    NumericCell::Value(v) => {
                        *cell = format_number(v);
                        entry.converted += 1;
                    }
                    NumericCell::Invalid => {
                        tracing::debug!("Could not convert '{}' in column '{}'", cell, column);
                        entry.failed += 1;
                    }
                    NumericCell::Absent => {}
                }
            }
        }
        stats
    }
}

/// Repeated headers get `.1`, `.2`, ... skipping any name already taken,
/// so `PRICE,PRICE.1,PRICE` reads as `PRICE,PRICE.1,PRICE.2`.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = headers.iter().cloned().collect();
    let mut first_seen: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            if first_seen.insert(header.clone()) {
                return header;
            }
            let suffix = next_suffix.entry(header.clone()).or_insert(1);
            loop {
                let candidate = format!("{}.{}", header, suffix);
                *suffix += 1;
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}
