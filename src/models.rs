//! Data models for trial trend analysis.
//!
//! This module contains the core data structures used throughout the
//! application: trial records, periods and the pivoted count tables.

use crate::analysis::FilterOptions;
use crate::error::TrendsError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// First year (inclusive) of the default period range.
pub const DEFAULT_START_YEAR: i32 = 2008;

/// Last year (exclusive) of the default period range.
pub const DEFAULT_END_YEAR: i32 = 2019;

/// Widest period range accepted, in calendar years.
pub const MAX_RANGE_YEARS: i32 = 1000;

/// Time granularity of the period axis.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Granularity {
    /// Calendar years
    #[default]
    Year,
    /// Calendar quarters
    Quarter,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Year => write!(f, "year"),
            Granularity::Quarter => write!(f, "quarter"),
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = TrendsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Granularity {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "year" | "years" | "y" => Ok(Granularity::Year),
            "quarter" | "quarters" | "q" => Ok(Granularity::Quarter),
            other => Err(TrendsError::UnsupportedGranularity(other.to_string())),
        }
    }
}

/// A calendar year or a calendar quarter.
///
/// Periods of the same granularity order chronologically. Text form is
/// `2015` for a year and `2015Q2` for a quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Period {
    Year(i32),
    Quarter { year: i32, quarter: u8 },
}

impl Period {
    /// Derive the period containing `date`.
    pub fn from_date(date: NaiveDate, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Year => Period::Year(date.year()),
            Granularity::Quarter => Period::Quarter {
                year: date.year(),
                quarter: (date.month0() / 3 + 1) as u8,
            },
        }
    }

    /// Returns the calendar year the period falls in.
    pub fn year(&self) -> i32 {
        match *self {
            Period::Year(year) => year,
            Period::Quarter { year, .. } => year,
        }
    }

    /// Returns the period immediately following this one.
    pub fn next(&self) -> Self {
        match *self {
            Period::Year(year) => Period::Year(year + 1),
            Period::Quarter { year, quarter: 4 } => Period::Quarter {
                year: year + 1,
                quarter: 1,
            },
            Period::Quarter { year, quarter } => Period::Quarter {
                year,
                quarter: quarter + 1,
            },
        }
    }

    /// First calendar day of the period.
    pub fn start_date(&self) -> Option<NaiveDate> {
        match *self {
            Period::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1),
            Period::Quarter { year, quarter } => {
                NaiveDate::from_ymd_opt(year, u32::from(quarter - 1) * 3 + 1, 1)
            }
        }
    }

    /// Express this bound at `granularity`.
    ///
    /// A year lifts to its first quarter. A quarter cannot be widened to a
    /// year, so that direction is a configuration error.
    pub fn anchor(self, granularity: Granularity) -> Result<Self, TrendsError> {
        match (self, granularity) {
            (Period::Year(year), Granularity::Quarter) => Ok(Period::Quarter { year, quarter: 1 }),
            (Period::Quarter { .. }, Granularity::Year) => Err(TrendsError::GranularityMismatch {
                period: self,
                granularity,
            }),
            _ => Ok(self),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(year) => write!(f, "{}", year),
            Period::Quarter { year, quarter } => write!(f, "{}Q{}", year, quarter),
        }
    }
}

impl FromStr for Period {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || TrendsError::InvalidPeriod(s.to_string());

        match trimmed.to_uppercase().split_once('Q') {
            Some((year, quarter)) => {
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
                if !(1..=4).contains(&quarter) {
                    return Err(invalid());
                }
                Ok(Period::Quarter { year, quarter })
            }
            None => trimmed.parse().map(Period::Year).map_err(|_| invalid()),
        }
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for Period {
    type Error = TrendsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Half-open range `[start, end)` on the period axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    /// First period included.
    pub start: Period,
    /// First period excluded.
    pub end: Period,
}

impl PeriodRange {
    /// Build a range, checking both bounds against `granularity`.
    pub fn new(start: Period, end: Period, granularity: Granularity) -> Result<Self, TrendsError> {
        let start = start.anchor(granularity)?;
        let end = end.anchor(granularity)?;
        if start >= end {
            return Err(TrendsError::EmptyRange { start, end });
        }
        if start.start_date().is_none()
            || end.start_date().is_none()
            || end.year().saturating_sub(start.year()) > MAX_RANGE_YEARS
        {
            return Err(TrendsError::RangeTooWide {
                start,
                end,
                max_years: MAX_RANGE_YEARS,
            });
        }
        Ok(Self { start, end })
    }

    /// The 2008 (inclusive) to 2019 (exclusive) window at `granularity`.
    pub fn default_for(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Year => Self {
                start: Period::Year(DEFAULT_START_YEAR),
                end: Period::Year(DEFAULT_END_YEAR),
            },
            Granularity::Quarter => Self {
                start: Period::Quarter {
                    year: DEFAULT_START_YEAR,
                    quarter: 1,
                },
                end: Period::Quarter {
                    year: DEFAULT_END_YEAR,
                    quarter: 1,
                },
            },
        }
    }

    /// Every period in the range, ascending.
    pub fn periods(&self) -> Vec<Period> {
        let mut periods = Vec::new();
        let mut current = self.start;
        while current < self.end {
            periods.push(current);
            current = current.next();
        }
        periods
    }
}

impl fmt::Display for PeriodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Registry identifier (EudraCT or NCT number).
    pub id: String,
    /// Country code or free-text location.
    pub location: String,
    /// Raw phase category as exported by the registry.
    pub phase: String,
    /// Parsed date per field; `None` when blank or unparseable.
    pub dates: BTreeMap<String, Option<NaiveDate>>,
}

impl TrialRecord {
    /// Creates a record with no date fields.
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            phase: phase.into(),
            dates: BTreeMap::new(),
        }
    }

    /// Builder-style setter for one date field.
    #[allow(dead_code)] // Builder utility
    pub fn with_date(mut self, field: impl Into<String>, date: Option<NaiveDate>) -> Self {
        self.dates.insert(field.into(), date);
        self
    }

    /// Whether the location cell is non-blank. Blank rows never form a location column.
    pub fn has_location(&self) -> bool {
        !self.location.trim().is_empty()
    }

    /// Returns the parsed date for `field`, if present and valid.
    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.dates.get(field).copied().flatten()
    }
}

/// An in-memory trial table with its declared date fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialTable {
    /// Date fields every record may carry, in schema order.
    pub date_fields: Vec<String>,
    /// The rows.
    pub records: Vec<TrialRecord>,
}

impl TrialTable {
    /// Creates an empty table declaring `date_fields`.
    pub fn new<I, S>(date_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            date_fields: date_fields.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    /// Appends a record.
    pub fn push(&mut self, record: TrialRecord) {
        self.records.push(record);
    }

    /// Builder-style variant of [`TrialTable::push`].
    #[allow(dead_code)] // Builder utility
    pub fn with_record(mut self, record: TrialRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `field` is a declared date field.
    pub fn has_field(&self, field: &str) -> bool {
        self.date_fields.iter().any(|f| f == field)
    }
}

/// A pivot table column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub enum Column {
    /// Counts for one location.
    Location(String),
    /// Counts over all locations (used when not grouping by location).
    Total,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Location(name) => write!(f, "{}", name),
            Column::Total => write!(f, "total"),
        }
    }
}

impl From<Column> for String {
    fn from(column: Column) -> Self {
        column.to_string()
    }
}

/// Trial counts indexed by period (rows) and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotTable {
    /// Granularity of the period index.
    pub granularity: Granularity,
    /// Row index, ascending.
    pub periods: Vec<Period>,
    /// Column index.
    pub columns: Vec<Column>,
    /// Row-major counts, `counts[row][col]`.
    pub counts: Vec<Vec<u64>>,
}

impl PivotTable {
    /// A table with no rows and no columns.
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            periods: Vec::new(),
            columns: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// A table over `periods` x `columns` with every cell zero.
    pub fn zeroed(granularity: Granularity, periods: Vec<Period>, columns: Vec<Column>) -> Self {
        let counts = vec![vec![0; columns.len()]; periods.len()];
        Self {
            granularity,
            periods,
            columns,
            counts,
        }
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Count at (`period`, `column`), or `None` if either is not in the index.
    pub fn get(&self, period: &Period, column: &Column) -> Option<u64> {
        let row = self.periods.binary_search(period).ok()?;
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.counts[row][col])
    }

    /// Convenience lookup for a location column.
    #[allow(dead_code)] // Lookup utility
    pub fn location_count(&self, period: &Period, location: &str) -> Option<u64> {
        self.get(period, &Column::Location(location.to_string()))
    }

    /// All counts in one column, in period order.
    #[allow(dead_code)] // Lookup utility
    pub fn column_values(&self, column: &Column) -> Option<Vec<u64>> {
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.counts.iter().map(|row| row[col]).collect())
    }

    /// Sum of each column over all periods.
    pub fn column_totals(&self) -> Vec<(Column, u64)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(col, column)| {
                let total = self.counts.iter().map(|row| row[col]).sum();
                (column.clone(), total)
            })
            .collect()
    }

    /// Location names present as columns, in column order.
    #[allow(dead_code)] // Lookup utility
    pub fn locations(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|c| match c {
                Column::Location(name) => Some(name.as_str()),
                Column::Total => None,
            })
            .collect()
    }

    /// Keep only location columns named in `locations` (the total column is kept).
    pub fn select_columns(&self, locations: &BTreeSet<String>) -> Self {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| match c {
                Column::Location(name) => locations.contains(name),
                Column::Total => true,
            })
            .map(|(i, _)| i)
            .collect();

        Self {
            granularity: self.granularity,
            periods: self.periods.clone(),
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            counts: self
                .counts
                .iter()
                .map(|row| keep.iter().map(|&i| row[i]).collect())
                .collect(),
        }
    }

    /// Move the `location` column to the end. Returns false if absent.
    pub fn move_column_last(&mut self, location: &str) -> bool {
        let target = Column::Location(location.to_string());
        let Some(col) = self.columns.iter().position(|c| *c == target) else {
            return false;
        };

        let column = self.columns.remove(col);
        self.columns.push(column);
        for row in &mut self.counts {
            let value = row.remove(col);
            row.push(value);
        }
        true
    }

    pub(crate) fn increment(&mut self, row: usize, col: usize) {
        self.counts[row][col] += 1;
    }
}

/// The pivot table produced for one date field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPivot {
    /// Date field the periods were derived from.
    pub field: String,
    /// Counts per period and column.
    pub table: PivotTable,
}

/// Metadata about a trend report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Input file the trials were read from.
    pub input: String,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Rows read from the input.
    pub rows_loaded: usize,
    /// Granularity of the period axis.
    pub granularity: Granularity,
    /// Period window applied.
    pub period_range: PeriodRange,
    /// Whether counts are split by location.
    pub group_by_location: bool,
    /// Row filters applied before counting.
    pub filters: FilterOptions,
    /// Duration of load and aggregation in seconds.
    pub duration_seconds: f64,
}

/// The complete trend report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Metadata about the report.
    pub metadata: ReportMetadata,
    /// Unfiltered trial count per location, largest first.
    pub location_totals: Vec<(String, u64)>,
    /// Locations chosen for charting, if a selection was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_locations: Option<BTreeSet<String>>,
    /// One pivot table per date field.
    pub pivots: Vec<FieldPivot>,
}
