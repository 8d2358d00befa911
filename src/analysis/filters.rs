//! Row filters shared by every date field of an aggregation.

use crate::models::{PeriodRange, TrialRecord, TrialTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Location value EUCTR uses for sites outside the EU/EEA ("third countries").
pub const REGION_SENTINEL: &str = "3rd";

/// Phase labels treated as "Phase 1 only" when none are configured.
pub fn default_phase_one_labels() -> BTreeSet<String> {
    ["1", "1.0", "True", "true", "Phase 1", "PHASE1"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Comparison used by [`crate::analysis::select_locations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    /// Strictly greater than the threshold
    #[default]
    Above,
    /// Strictly less than the threshold
    Below,
}

impl Relation {
    /// Whether `count` satisfies the relation against `threshold`.
    pub fn holds(&self, count: u64, threshold: u64) -> bool {
        match self {
            Relation::Above => count > threshold,
            Relation::Below => count < threshold,
        }
    }
}

/// Filter options applied to rows before grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Locations dropped by name.
    #[serde(default)]
    pub exclude_locations: BTreeSet<String>,

    /// Drop locations with fewer rows than this in the unfiltered table.
    #[serde(default)]
    pub min_count_per_location: Option<u64>,

    /// Drop the [`REGION_SENTINEL`] location.
    #[serde(default)]
    pub exclude_non_region_locations: bool,

    /// Drop rows whose phase is exactly one of `phase_one_labels`.
    #[serde(default = "default_true")]
    pub drop_phase_one_only: bool,

    /// Phase values meaning "Phase 1 only". Combined phases never match.
    #[serde(default = "default_phase_one_labels")]
    pub phase_one_labels: BTreeSet<String>,

    /// Period window; `None` means the default window for the granularity.
    #[serde(default)]
    pub period_range: Option<PeriodRange>,
}

fn default_true() -> bool {
    true
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            exclude_locations: BTreeSet::new(),
            min_count_per_location: None,
            exclude_non_region_locations: false,
            drop_phase_one_only: true,
            phase_one_labels: default_phase_one_labels(),
            period_range: None,
        }
    }
}

impl FilterOptions {
    /// Union of every location exclusion rule, evaluated against `table`.
    pub fn excluded_locations(&self, table: &TrialTable) -> BTreeSet<String> {
        let mut excluded = self.exclude_locations.clone();

        if let Some(min) = self.min_count_per_location {
            let small: Vec<String> = location_counts(table)
                .into_iter()
                .filter(|(_, count)| *count < min)
                .map(|(location, _)| location)
                .collect();
            debug!("{} locations below {} trials", small.len(), min);
            excluded.extend(small);
        }

        if self.exclude_non_region_locations {
            excluded.insert(REGION_SENTINEL.to_string());
        }

        excluded
    }

    /// Whether `phase` is a "Phase 1 only" category.
    pub fn is_phase_one_only(&self, phase: &str) -> bool {
        self.phase_one_labels.contains(phase.trim())
    }

    /// Whether `record` survives the row filters given the precomputed exclusions.
    pub fn keeps(&self, record: &TrialRecord, excluded: &BTreeSet<String>) -> bool {
        if excluded.contains(&record.location) {
            return false;
        }
        !(self.drop_phase_one_only && self.is_phase_one_only(&record.phase))
    }
}

/// Raw row count per location over the whole table. Blank locations are skipped.
pub fn location_counts(table: &TrialTable) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    for record in table.records.iter().filter(|r| r.has_location()) {
        *counts.entry(record.location.clone()).or_default() += 1;
    }

    counts
}
