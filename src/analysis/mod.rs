//! Trial count aggregation.
//!
//! `filters` holds the row-level rules shared by every date field;
//! `aggregator` does the grouping and pivoting.

pub mod aggregator;
pub mod filters;

pub use aggregator::*;
pub use filters::{FilterOptions, Relation};
