//! Loosely-typed rows decoded from a source file.

use std::collections::HashMap;

/// A single decoded cell. No coercion happens at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Empty,
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Renders the cell as trimmed text, `None` when blank.
    ///
    /// Integral floats render without a fractional part so a numeric
    /// category cell of `2024` reads as "2024", not "2024.0".
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", *f as i64)
            }
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Empty => return None,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Ephemeral mapping from normalized column name to cell value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    /// 1-based position among the data rows of the source
    pub index: u64,
    cells: HashMap<String, CellValue>,
}

impl RawRow {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            cells: HashMap::new(),
        }
    }

    /// Inserts a cell under the normalized form of `column`.
    pub fn insert(&mut self, column: &str, value: CellValue) {
        self.cells.insert(normalize_column(column), value);
    }

    pub fn with(mut self, column: &str, value: CellValue) -> Self {
        self.insert(column, value);
        self
    }

    /// Looks up a cell; absent columns yield `None`.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(&normalize_column(column))
    }

    pub fn is_blank(&self) -> bool {
        self.cells.values().all(CellValue::is_blank)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Header names are matched case-insensitively and ignore surrounding space.
pub fn normalize_column(column: &str) -> String {
    column.trim().to_lowercase()
}
