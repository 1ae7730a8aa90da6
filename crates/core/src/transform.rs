//! Row validation and transformation into catalog records.
//!
//! Required fields (name, category, price) are strict: a row missing any of
//! them is rejected. Optional fields are lenient: a bad stock cell becomes 0
//! and a blank description becomes absent. Nothing here returns an error;
//! rejection is an ordinary outcome.

use std::fmt;

use crate::record::NewRecord;
use crate::row::{CellValue, RawRow};
use crate::run::RunId;

pub const FIELD_NAME: &str = "name";
pub const FIELD_CATEGORY: &str = "category";
pub const FIELD_PRICE: &str = "price";
pub const FIELD_STOCK: &str = "stock";
pub const FIELD_DESCRIPTION: &str = "description";

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingName,
    MissingCategory,
    InvalidPrice,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingName => "missing name",
            Self::MissingCategory => "missing category",
            Self::InvalidPrice => "price is not a finite number",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts one raw row into a record, or reports why it was rejected.
pub fn transform_row(run_id: RunId, row: &RawRow) -> Result<NewRecord, RejectReason> {
    let name = text_field(row, FIELD_NAME).ok_or(RejectReason::MissingName)?;
    let category = text_field(row, FIELD_CATEGORY).ok_or(RejectReason::MissingCategory)?;
    let price = row
        .get(FIELD_PRICE)
        .and_then(parse_price)
        .ok_or(RejectReason::InvalidPrice)?;
    let stock = row.get(FIELD_STOCK).and_then(parse_stock).unwrap_or(0);
    let description = text_field(row, FIELD_DESCRIPTION);

    Ok(NewRecord {
        run_id,
        source_row: row.index,
        name,
        category,
        price,
        stock,
        description,
    })
}

/// Transforms a slice of rows, splitting accepted records from rejections.
pub fn transform_batch(
    run_id: RunId,
    rows: &[RawRow],
) -> (Vec<NewRecord>, Vec<(u64, RejectReason)>) {
    let mut accepted = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for row in rows {
        match transform_row(run_id, row) {
            Ok(record) => accepted.push(record),
            Err(reason) => rejected.push((row.index, reason)),
        }
    }

    (accepted, rejected)
}

fn text_field(row: &RawRow, column: &str) -> Option<String> {
    row.get(column).and_then(CellValue::as_text)
}

fn parse_price(cell: &CellValue) -> Option<f64> {
    let value = match cell {
        CellValue::Float(f) => *f,
        CellValue::Int(i) => *i as f64,
        CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
        CellValue::Bool(_) | CellValue::Empty => return None,
    };
    value.is_finite().then_some(value)
}

fn parse_stock(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Int(i) => Some(*i),
        CellValue::Float(f) => truncate(*f),
        CellValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        CellValue::Bool(_) | CellValue::Empty => None,
    }
}

fn truncate(value: f64) -> Option<i64> {
    if value.is_finite() && value.abs() < i64::MAX as f64 {
        Some(value.trunc() as i64)
    } else {
        None
    }
}
