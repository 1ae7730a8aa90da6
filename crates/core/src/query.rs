//! Generic list filtering and pagination for runs and records.
//!
//! A query carries at most one `field op value` filter. Fields are checked
//! against a whitelist per entity so store implementations can map them to
//! columns without interpolating caller input.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::ImportedRecord;
use crate::run::IngestionRun;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl FilterOp {
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            other => Err(Error::validation(format!("unknown filter operator '{}'", other))),
        }
    }

    /// SQL comparison operator; `Contains` is handled separately.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Contains => "ILIKE",
        }
    }
}

/// Raw list parameters as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub field: Option<String>,
    pub op: Option<String>,
    pub value: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    /// Validates the filter against the fields `E` exposes.
    pub fn filter<E: Filterable>(&self) -> Result<Option<Filter>> {
        let Some(field) = self.field.as_deref().filter(|f| !f.trim().is_empty()) else {
            return Ok(None);
        };
        let field = E::FIELDS
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(field.trim()))
            .ok_or_else(|| Error::validation(format!("cannot filter on field '{}'", field)))?;
        let op = match self.op.as_deref() {
            Some(op) => FilterOp::parse(op)?,
            None => FilterOp::Eq,
        };
        let value = self
            .value
            .clone()
            .ok_or_else(|| Error::validation("filter value is required"))?;

        if field.kind == FieldKind::Number {
            if op == FilterOp::Contains {
                return Err(Error::validation(format!(
                    "operator 'contains' is not supported on numeric field '{}'",
                    field.name
                )));
            }
            if value.trim().parse::<f64>().is_err() {
                return Err(Error::validation(format!(
                    "field '{}' expects a numeric value",
                    field.name
                )));
            }
        }

        Ok(Some(Filter {
            field: field.name,
            column: field.column,
            kind: field.kind,
            op,
            value,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
}

/// A filterable field: API name, backing column, and value kind.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

/// A validated filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub op: FilterOp,
    pub value: String,
}

/// A value read from an entity for in-memory filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Null,
}

impl Filter {
    /// Evaluates the filter against an entity.
    pub fn matches<E: Filterable>(&self, entity: &E) -> bool {
        match entity.field_value(self.field) {
            FieldValue::Null => self.op == FilterOp::Ne,
            FieldValue::Number(actual) => {
                let Ok(expected) = self.value.trim().parse::<f64>() else {
                    return false;
                };
                match self.op {
                    FilterOp::Eq => actual == expected,
                    FilterOp::Ne => actual != expected,
                    FilterOp::Gt => actual > expected,
                    FilterOp::Gte => actual >= expected,
                    FilterOp::Lt => actual < expected,
                    FilterOp::Lte => actual <= expected,
                    FilterOp::Contains => false,
                }
            }
            FieldValue::Text(actual) => {
                let actual = actual.as_str();
                let expected = self.value.as_str();
                match self.op {
                    FilterOp::Eq => actual == expected,
                    FilterOp::Ne => actual != expected,
                    FilterOp::Gt => actual > expected,
                    FilterOp::Gte => actual >= expected,
                    FilterOp::Lt => actual < expected,
                    FilterOp::Lte => actual <= expected,
                    FilterOp::Contains => actual
                        .to_lowercase()
                        .contains(&expected.to_lowercase()),
                }
            }
        }
    }
}

/// Entities that can be listed with a filter.
pub trait Filterable {
    const FIELDS: &'static [FieldSpec];

    fn field_value(&self, field: &str) -> FieldValue;
}

impl Filterable for IngestionRun {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec {
            name: "status",
            column: "status",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "fileName",
            column: "file_name",
            kind: FieldKind::Text,
        },
    ];

    fn field_value(&self, field: &str) -> FieldValue {
        match field {
            "status" => FieldValue::Text(self.status.as_str().to_string()),
            "fileName" => FieldValue::Text(self.file_name.clone()),
            _ => FieldValue::Null,
        }
    }
}

impl Filterable for ImportedRecord {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec {
            name: "name",
            column: "name",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "category",
            column: "category",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "price",
            column: "price",
            kind: FieldKind::Number,
        },
        FieldSpec {
            name: "stock",
            column: "stock",
            kind: FieldKind::Number,
        },
        FieldSpec {
            name: "description",
            column: "description",
            kind: FieldKind::Text,
        },
    ];

    fn field_value(&self, field: &str) -> FieldValue {
        match field {
            "name" => FieldValue::Text(self.name.clone()),
            "category" => FieldValue::Text(self.category.clone()),
            "price" => FieldValue::Number(self.price),
            "stock" => FieldValue::Number(self.stock as f64),
            "description" => self
                .description
                .clone()
                .map(FieldValue::Text)
                .unwrap_or(FieldValue::Null),
            _ => FieldValue::Null,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    /// Total matching items across all pages
    pub total: u64,
}

impl<T> Page<T> {
    /// Slices an already filtered and ordered collection.
    pub fn from_vec(items: Vec<T>, query: &ListQuery) -> Self {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .collect();
        Self {
            items,
            page: query.page(),
            page_size: query.page_size(),
            total,
        }
    }
}
