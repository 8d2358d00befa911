//! Typed configuration errors raised by the aggregation core.

use crate::models::{Granularity, Period};
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported when an aggregation or load is configured incorrectly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrendsError {
    /// A requested date field is not part of the table schema.
    #[error("unknown date field '{field}' (known fields: {known})")]
    UnknownField { field: String, known: String },

    /// The input file lacks a column the schema requires.
    #[error("missing column '{column}' in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    /// A period bound does not match the requested granularity.
    #[error("period bound {period} does not match {granularity} granularity")]
    GranularityMismatch {
        period: Period,
        granularity: Granularity,
    },

    /// The period range is empty or inverted.
    #[error("period range [{start}, {end}) is empty")]
    EmptyRange { start: Period, end: Period },

    /// The period range is unrepresentable or spans too many years.
    #[error("period range [{start}, {end}) exceeds {max_years} years")]
    RangeTooWide {
        start: Period,
        end: Period,
        max_years: i32,
    },

    /// A period string could not be parsed.
    #[error("invalid period '{0}' (expected YYYY or YYYYQn)")]
    InvalidPeriod(String),

    /// A granularity string could not be parsed.
    #[error("unsupported granularity '{0}' (expected 'year' or 'quarter')")]
    UnsupportedGranularity(String),
}
