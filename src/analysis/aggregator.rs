//! Trial count aggregation and pivoting.
//!
//! This module turns a trial table into one period-by-location pivot table
//! per date field, and provides the location selection helpers used to
//! decide which columns are worth charting.

use crate::analysis::filters::{location_counts, FilterOptions, REGION_SENTINEL};
use crate::analysis::Relation;
use crate::error::TrendsError;
use crate::models::{
    Column, FieldPivot, Granularity, Period, PeriodRange, PivotTable, TrialRecord, TrialTable,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Look up the table for `field` in an aggregation result.
#[allow(dead_code)] // Lookup utility
pub fn find_field<'a>(pivots: &'a [FieldPivot], field: &str) -> Option<&'a PivotTable> {
    pivots.iter().find(|p| p.field == field).map(|p| &p.table)
}

/// Count trials per period (and location) for each field in `fields`.
///
/// Every returned table shares the same period index and columns. An empty
/// input table yields empty pivot tables; a table whose rows are all
/// filtered out yields the full period index with zero counts.
pub fn aggregate<S: AsRef<str>>(
    table: &TrialTable,
    fields: &[S],
    group_by_location: bool,
    granularity: Granularity,
    filters: &FilterOptions,
) -> Result<Vec<FieldPivot>, TrendsError> {
    let mut requested: Vec<&str> = Vec::with_capacity(fields.len());
    for field in fields.iter().map(|f| f.as_ref()) {
        if !table.has_field(field) {
            return Err(TrendsError::UnknownField {
                field: field.to_string(),
                known: table.date_fields.join(", "),
            });
        }
        if !requested.contains(&field) {
            requested.push(field);
        }
    }

    let range = match filters.period_range {
        Some(range) => PeriodRange::new(range.start, range.end, granularity)?,
        None => PeriodRange::default_for(granularity),
    };

    if table.is_empty() {
        debug!("empty trial table, returning empty pivots");
        return Ok(requested
            .into_iter()
            .map(|field| FieldPivot {
                field: field.to_string(),
                table: PivotTable::empty(granularity),
            })
            .collect());
    }

    let excluded = filters.excluded_locations(table);
    let rows: Vec<&TrialRecord> = table
        .records
        .iter()
        .filter(|r| filters.keeps(r, &excluded))
        .collect();
    debug!(
        "{} of {} rows kept after filters ({} locations excluded)",
        rows.len(),
        table.len(),
        excluded.len()
    );

    let columns: Vec<Column> = if group_by_location {
        rows.iter()
            .filter(|r| r.has_location())
            .map(|r| r.location.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|l| Column::Location(l.to_string()))
            .collect()
    } else {
        vec![Column::Total]
    };
    let periods = range.periods();

    let pivots = requested
        .into_iter()
        .map(|field| FieldPivot {
            field: field.to_string(),
            table: count_field(&rows, field, group_by_location, granularity, &periods, &columns),
        })
        .collect();

    Ok(pivots)
}

fn count_field(
    rows: &[&TrialRecord],
    field: &str,
    group_by_location: bool,
    granularity: Granularity,
    periods: &[Period],
    columns: &[Column],
) -> PivotTable {
    let mut pivot = PivotTable::zeroed(granularity, periods.to_vec(), columns.to_vec());
    let column_index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Column::Location(name) => Some((name.as_str(), i)),
            Column::Total => None,
        })
        .collect();

    let mut missing = 0usize;
    let mut outside = 0usize;

    for row in rows {
        let Some(date) = row.date(field) else {
            missing += 1;
            continue;
        };

        let Ok(r) = periods.binary_search(&Period::from_date(date, granularity)) else {
            outside += 1;
            continue;
        };

        let c = if group_by_location {
            let Some(&c) = column_index.get(row.location.as_str()) else {
                continue;
            };
            c
        } else {
            0
        };

        pivot.increment(r, c);
    }

    debug!(field, missing, outside, "aggregated field");
    pivot
}

/// Locations whose unfiltered row count is above or below `threshold`.
pub fn select_locations(
    table: &TrialTable,
    threshold: u64,
    relation: Relation,
    exclude_region_sentinel: bool,
) -> BTreeSet<String> {
    location_counts(table)
        .into_iter()
        .filter(|(location, _)| !(exclude_region_sentinel && location == REGION_SENTINEL))
        .filter(|(_, count)| relation.holds(*count, threshold))
        .map(|(location, _)| location)
        .collect()
}

/// The `n` locations with the most rows, largest first.
pub fn top_locations(
    table: &TrialTable,
    n: usize,
    exclude_region_sentinel: bool,
) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = location_counts(table)
        .into_iter()
        .filter(|(location, _)| !(exclude_region_sentinel && location == REGION_SENTINEL))
        .collect();

    counts.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    counts.truncate(n);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn record(id: &str, location: &str, phase: &str, cad: &str) -> TrialRecord {
        TrialRecord::new(id, location, phase).with_date("cad", date(cad))
    }

    fn sample_table() -> TrialTable {
        let mut table = TrialTable::new(["cad", "ethics"]);
        let rows = [
            ("1", "GB", "Phase 2", "2010-03-01", "2010-01-15"),
            ("2", "GB", "Phase 1", "2010-04-01", "2009-12-01"),
            ("3", "DE", "Phase 3", "2012-11-30", "2012-08-01"),
            ("4", "DE", "Phase 1/Phase 2", "2012-02-10", "not-a-date"),
            ("5", "FR", "Phase 2", "2007-06-01", "2008-01-01"),
            ("6", "3rd", "Phase 2", "2015-05-01", "2015-05-01"),
            ("7", "GB", "Phase 3", "2018-12-31", "2018-10-01"),
            ("8", "GB", "Phase 4", "2019-01-01", ""),
        ];
        for (id, location, phase, cad, ethics) in rows {
            table.push(
                TrialRecord::new(id, location, phase)
                    .with_date("cad", date(cad))
                    .with_date("ethics", date(ethics)),
            );
        }
        table
    }

    fn by_year(table: &TrialTable, fields: &[&str], filters: &FilterOptions) -> Vec<FieldPivot> {
        aggregate(table, fields, true, Granularity::Year, filters).unwrap()
    }

    #[test]
    fn test_phase_one_row_not_counted() {
        let table = TrialTable::new(["cad"])
            .with_record(record("1", "GB", "Phase 1", "2010-03-01"))
            .with_record(record("2", "GB", "Phase 2", "2010-04-01"));

        let pivots = by_year(&table, &["cad"], &FilterOptions::default());
        let cad = find_field(&pivots, "cad").unwrap();

        assert_eq!(cad.locations(), vec!["GB"]);
        assert_eq!(cad.location_count(&Period::Year(2010), "GB"), Some(1));
    }

    #[test]
    fn test_min_count_drops_small_locations() {
        let table = TrialTable::new(["cad"])
            .with_record(record("1", "XX", "Phase 2", "2010-03-01"))
            .with_record(record("2", "XX", "Phase 2", "2011-03-01"))
            .with_record(record("3", "YY", "Phase 2", "2012-03-01"));

        let filters = FilterOptions {
            min_count_per_location: Some(2),
            ..FilterOptions::default()
        };
        let pivots = by_year(&table, &["cad"], &filters);
        let cad = find_field(&pivots, "cad").unwrap();

        assert!(cad.locations().contains(&"XX"));
        assert!(!cad.locations().contains(&"YY"));
    }

    #[test]
    fn test_bad_date_only_affects_its_field() {
        let table = sample_table();
        let pivots = by_year(&table, &["cad", "ethics"], &FilterOptions::default());

        let cad = find_field(&pivots, "cad").unwrap();
        let ethics = find_field(&pivots, "ethics").unwrap();

        // Row 4 has a valid cad date but an unparseable ethics date.
        assert_eq!(cad.location_count(&Period::Year(2012), "DE"), Some(2));
        assert_eq!(ethics.location_count(&Period::Year(2012), "DE"), Some(1));
    }

    #[test]
    fn test_zero_fill_and_shared_index() {
        let table = sample_table();
        let pivots = by_year(&table, &["cad", "ethics"], &FilterOptions::default());

        let expected: Vec<Period> = (2008..2019).map(Period::Year).collect();
        for pivot in &pivots {
            assert_eq!(pivot.table.periods, expected);
            assert_eq!(pivot.table.columns, pivots[0].table.columns);
            assert!(pivot.table.counts.iter().all(|row| row.len() == pivot.table.columns.len()));
        }

        let cad = find_field(&pivots, "cad").unwrap();
        assert_eq!(cad.location_count(&Period::Year(2013), "GB"), Some(0));
        let gb = Column::Location("GB".to_string());
        assert_eq!(cad.get(&Period::Year(2014), &gb), Some(0));
    }

    #[test]
    fn test_range_is_half_open() {
        let table = sample_table();
        let pivots = by_year(&table, &["cad"], &FilterOptions::default());
        let cad = find_field(&pivots, "cad").unwrap();

        // 2018-12-31 is inside, 2019-01-01 and 2007 are outside.
        assert_eq!(cad.location_count(&Period::Year(2018), "GB"), Some(1));
        assert_eq!(cad.location_count(&Period::Year(2019), "GB"), None);
        assert_eq!(cad.location_count(&Period::Year(2007), "FR"), None);
        let fr_total: u64 = cad
            .column_values(&Column::Location("FR".to_string()))
            .unwrap()
            .iter()
            .sum();
        assert_eq!(fr_total, 0);
    }

    #[test]
    fn test_custom_range() {
        let table = sample_table();
        let filters = FilterOptions {
            period_range: Some(PeriodRange {
                start: Period::Year(2015),
                end: Period::Year(2020),
            }),
            ..FilterOptions::default()
        };
        let pivots = by_year(&table, &["cad"], &filters);
        let cad = find_field(&pivots, "cad").unwrap();

        assert_eq!(cad.periods.first(), Some(&Period::Year(2015)));
        assert_eq!(cad.periods.last(), Some(&Period::Year(2019)));
        assert_eq!(cad.location_count(&Period::Year(2019), "GB"), Some(1));
    }

    #[test]
    fn test_quarters_sum_to_years() {
        let table = sample_table();
        let filters = FilterOptions::default();
        let yearly = by_year(&table, &["cad", "ethics"], &filters);
        let quarterly =
            aggregate(&table, &["cad", "ethics"], true, Granularity::Quarter, &filters).unwrap();

        for (y, q) in yearly.iter().zip(&quarterly) {
            assert_eq!(y.table.columns, q.table.columns);
            for (row, period) in y.table.periods.iter().enumerate() {
                for (col, _) in y.table.columns.iter().enumerate() {
                    let quarter_sum: u64 = q
                        .table
                        .periods
                        .iter()
                        .zip(&q.table.counts)
                        .filter(|(p, _)| p.year() == period.year())
                        .map(|(_, counts)| counts[col])
                        .sum();
                    assert_eq!(quarter_sum, y.table.counts[row][col]);
                }
            }
        }
    }

    #[test]
    fn test_quarter_mapping() {
        let table = sample_table();
        let filters = FilterOptions {
            exclude_non_region_locations: false,
            ..FilterOptions::default()
        };
        let pivots = aggregate(&table, &["cad"], true, Granularity::Quarter, &filters).unwrap();
        let cad = find_field(&pivots, "cad").unwrap();

        let q2 = Period::Quarter {
            year: 2015,
            quarter: 2,
        };
        assert_eq!(cad.location_count(&q2, "3rd"), Some(1));
        assert_eq!(cad.periods.len(), 44);
    }

    #[test]
    fn test_phase_filter_is_monotone() {
        let table = sample_table();
        let strict = by_year(&table, &["cad", "ethics"], &FilterOptions::default());
        let loose_filters = FilterOptions {
            drop_phase_one_only: false,
            ..FilterOptions::default()
        };
        let loose = by_year(&table, &["cad", "ethics"], &loose_filters);

        for (s, l) in strict.iter().zip(&loose) {
            for period in &s.table.periods {
                for column in &s.table.columns {
                    let strict_count = s.table.get(period, column).unwrap();
                    let loose_count = l.table.get(period, column).unwrap_or(0);
                    assert!(strict_count <= loose_count);
                }
            }
        }
    }

    #[test]
    fn test_excluded_locations_never_columns() {
        let table = sample_table();
        let filters = FilterOptions {
            exclude_locations: ["DE".to_string()].into(),
            exclude_non_region_locations: true,
            ..FilterOptions::default()
        };
        let pivots = by_year(&table, &["cad"], &filters);
        let cad = find_field(&pivots, "cad").unwrap();

        assert!(!cad.locations().contains(&"DE"));
        assert!(!cad.locations().contains(&"3rd"));
        assert!(cad.locations().contains(&"GB"));
    }

    #[test]
    fn test_ungrouped_total_column() {
        let table = sample_table();
        let pivots =
            aggregate(&table, &["cad"], false, Granularity::Year, &FilterOptions::default())
                .unwrap();
        let cad = find_field(&pivots, "cad").unwrap();

        assert_eq!(cad.columns, vec![Column::Total]);
        assert_eq!(cad.get(&Period::Year(2012), &Column::Total), Some(2));
        assert_eq!(cad.get(&Period::Year(2010), &Column::Total), Some(1));
    }

    #[test]
    fn test_blank_location_only_counts_toward_total() {
        let table = TrialTable::new(["cad"])
            .with_record(record("1", "GB", "0", "2010-01-01"))
            .with_record(record("2", "", "0", "2010-01-01"));
        let filters = FilterOptions::default();

        let grouped = by_year(&table, &["cad"], &filters);
        let cad = find_field(&grouped, "cad").unwrap();
        assert_eq!(cad.columns, vec![Column::Location("GB".to_string())]);
        assert_eq!(cad.location_count(&Period::Year(2010), ""), None);
        assert_eq!(cad.location_count(&Period::Year(2010), "GB"), Some(1));

        let total = aggregate(&table, &["cad"], false, Granularity::Year, &filters).unwrap();
        let cad = find_field(&total, "cad").unwrap();
        assert_eq!(cad.get(&Period::Year(2010), &Column::Total), Some(2));

        let selected = select_locations(&table, 0, Relation::Above, true);
        assert_eq!(selected, ["GB".to_string()].into());
        assert_eq!(top_locations(&table, 10, false), vec![("GB".to_string(), 1)]);
    }

    #[test]
    fn test_unknown_field_is_error() {
        let table = sample_table();
        let err = aggregate(
            &table,
            &["cad", "start"],
            true,
            Granularity::Year,
            &FilterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrendsError::UnknownField { ref field, .. } if field == "start"));
    }

    #[test]
    fn test_empty_table_gives_empty_pivots() {
        let table = TrialTable::new(["cad", "ethics"]);
        let pivots = by_year(&table, &["cad", "ethics"], &FilterOptions::default());

        assert_eq!(pivots.len(), 2);
        assert!(pivots.iter().all(|p| p.table.is_empty()));
    }

    #[test]
    fn test_all_rows_filtered_gives_zeros() {
        let table =
            TrialTable::new(["cad"]).with_record(record("1", "GB", "Phase 1", "2010-03-01"));
        let pivots =
            aggregate(&table, &["cad"], false, Granularity::Year, &FilterOptions::default())
                .unwrap();
        let cad = find_field(&pivots, "cad").unwrap();

        assert_eq!(cad.periods.len(), 11);
        assert!(cad.counts.iter().flatten().all(|&c| c == 0));
    }

    #[test]
    fn test_quarter_range_rejected_for_years() {
        let table = sample_table();
        let filters = FilterOptions {
            period_range: Some(PeriodRange {
                start: Period::Quarter {
                    year: 2010,
                    quarter: 2,
                },
                end: Period::Quarter {
                    year: 2012,
                    quarter: 1,
                },
            }),
            ..FilterOptions::default()
        };
        let err = aggregate(&table, &["cad"], true, Granularity::Year, &filters).unwrap_err();
        assert!(matches!(err, TrendsError::GranularityMismatch { .. }));
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let table = sample_table();
        let filters = FilterOptions::default();
        let fields = ["cad", "ethics"];
        let first = aggregate(&table, &fields, true, Granularity::Quarter, &filters).unwrap();
        let second = aggregate(&table, &fields, true, Granularity::Quarter, &filters).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_ids_counted_separately() {
        let table = TrialTable::new(["cad"])
            .with_record(record("1", "GB", "Phase 2", "2010-03-01"))
            .with_record(record("1", "GB", "Phase 2", "2010-03-01"));
        let pivots = by_year(&table, &["cad"], &FilterOptions::default());
        assert_eq!(
            find_field(&pivots, "cad")
                .unwrap()
                .location_count(&Period::Year(2010), "GB"),
            Some(2)
        );
    }

    #[test]
    fn test_select_locations() {
        let table = sample_table();

        let above = select_locations(&table, 1, Relation::Above, true);
        assert_eq!(above, ["DE".to_string(), "GB".to_string()].into());

        let below = select_locations(&table, 2, Relation::Below, false);
        assert_eq!(below, ["3rd".to_string(), "FR".to_string()].into());

        let below_no_sentinel = select_locations(&table, 2, Relation::Below, true);
        assert_eq!(below_no_sentinel, ["FR".to_string()].into());
    }

    #[test]
    fn test_top_locations() {
        let table = sample_table();
        let top = top_locations(&table, 2, true);
        assert_eq!(top[0], ("GB".to_string(), 4));
        assert_eq!(top[1], ("DE".to_string(), 2));
    }

    #[test]
    fn test_loaded_export_end_to_end() {
        use crate::config::SchemaConfig;
        use crate::loader::{read_trials, unnamed_source, TableSchema};

        let schema = TableSchema::try_from(&SchemaConfig::euctr()).unwrap();
        let csv = include_str!("../../fixtures/euctr_sample.csv");
        let table = read_trials(csv.as_bytes(), &unnamed_source(), &schema, false).unwrap();

        let filters = FilterOptions {
            exclude_non_region_locations: true,
            ..FilterOptions::default()
        };
        let pivots = by_year(&table, &["cad", "ethics", "entered"], &filters);
        let cad = find_field(&pivots, "cad").unwrap();
        let ethics = find_field(&pivots, "ethics").unwrap();

        assert_eq!(cad.locations(), vec!["DE", "FR", "GB", "IT"]);
        // Phase 1 trial 2008-000002-22 is dropped; 2019 is outside the window.
        assert_eq!(cad.location_count(&Period::Year(2010), "GB"), Some(1));
        assert_eq!(cad.location_count(&Period::Year(2016), "GB"), Some(1));
        assert_eq!(cad.location_count(&Period::Year(2015), "IT"), Some(1));
        let gb_cad: u64 = cad
            .column_values(&Column::Location("GB".to_string()))
            .unwrap()
            .iter()
            .sum();
        assert_eq!(gb_cad, 2);

        // Blank cad date still counts for ethics; placeholder text does not.
        assert_eq!(ethics.location_count(&Period::Year(2014), "GB"), Some(1));
        assert_eq!(ethics.location_count(&Period::Year(2012), "DE"), Some(0));
    }
}
