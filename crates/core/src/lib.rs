//! Core types, row parsing, and validation for the catalog import pipeline.

pub mod error;
pub mod limits;
pub mod parse;
pub mod query;
pub mod record;
pub mod row;
pub mod run;
pub mod transform;

pub use error::{DbErrorCode, Error, Result};
pub use parse::{parse_rows, SourceFormat};
pub use query::{Filter, FilterOp, Filterable, ListQuery, Page};
pub use record::*;
pub use row::*;
pub use run::*;
pub use transform::{transform_batch, transform_row, RejectReason};
