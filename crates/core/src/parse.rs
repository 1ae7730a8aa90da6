//! Spreadsheet decoding into raw rows.
//!
//! The first row of the relevant sheet is the header; each following
//! non-blank row becomes one `RawRow` keyed by normalized header name.
//! Source order is preserved.

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::{CellValue, RawRow};

/// Supported source file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Office Open XML workbook; the first worksheet is read
    #[default]
    Xlsx,
    Csv,
}

impl SourceFormat {
    /// Derives the format from a file name extension, defaulting to Xlsx.
    pub fn from_file_name(file_name: &str) -> Self {
        let lower = file_name.trim().to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Self::Csv
        } else {
            Self::Xlsx
        }
    }
}

/// Decodes `bytes` into rows. Read-only; fails only on malformed input.
pub fn parse_rows(bytes: &[u8], format: SourceFormat) -> Result<Vec<RawRow>> {
    match format {
        SourceFormat::Xlsx => parse_xlsx(bytes),
        SourceFormat::Csv => parse_csv(bytes),
    }
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| Error::parse(format!("not a valid xlsx workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::parse("workbook contains no worksheets"))?
        .map_err(|e| Error::parse(format!("failed to read first worksheet: {}", e)))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<Option<String>> = header_row
        .iter()
        .map(|cell| cell_from_xlsx(cell).as_text())
        .collect();

    Ok(collect_rows(
        rows.map(|cells| cells.iter().map(cell_from_xlsx).collect::<Vec<_>>()),
        &headers,
    ))
}

fn cell_from_xlsx(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Empty | Data::Error(_) => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<Option<String>> = reader
        .headers()
        .map_err(|e| Error::parse(format!("invalid csv header: {}", e)))?
        .iter()
        .map(|h| {
            let h = h.trim_start_matches('\u{feff}').trim();
            (!h.is_empty()).then(|| h.to_string())
        })
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::parse(format!("invalid csv record: {}", e)))?;
        records.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect::<Vec<_>>(),
        );
    }

    Ok(collect_rows(records.into_iter(), &headers))
}

/// Zips data rows with headers, skipping blank rows and unnamed columns.
fn collect_rows<I>(data: I, headers: &[Option<String>]) -> Vec<RawRow>
where
    I: Iterator<Item = Vec<CellValue>>,
{
    let mut rows = Vec::new();

    for cells in data {
        let mut row = RawRow::new(rows.len() as u64 + 1);
        for (header, cell) in headers.iter().zip(cells) {
            if let Some(header) = header {
                row.insert(header, cell);
            }
        }
        if !row.is_blank() {
            rows.push(row);
        }
    }

    rows
}
