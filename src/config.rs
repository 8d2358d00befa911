//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.trialtrends.toml` files.

use crate::analysis::filters::default_phase_one_labels;
use crate::analysis::FilterOptions;
use crate::error::TrendsError;
use crate::models::{Granularity, Period, PeriodRange, DEFAULT_END_YEAR, DEFAULT_START_YEAR};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".trialtrends.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Input column layout.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Row filters.
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Grouping and period settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Show a spinner while reading the input.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            show_progress: true,
        }
    }
}

fn default_output() -> String {
    "trial_trends.md".to_string()
}

fn default_true() -> bool {
    true
}

/// Registry export the schema presets describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Source {
    /// EU Clinical Trials Register snapshot
    #[default]
    Euctr,
    /// ClinicalTrials.gov extract
    Ctgov,
}

/// A named date field and the column it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateColumn {
    /// Short field name used on the command line and in reports.
    pub name: String,
    /// Column header in the input file.
    pub column: String,
}

impl DateColumn {
    fn new(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
        }
    }
}

/// Input column layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Trial identifier column.
    pub id_column: String,

    /// Location column.
    pub location_column: String,

    /// Phase column.
    pub phase_column: String,

    /// Field delimiter (single character).
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Date fields.
    #[serde(default)]
    pub dates: Vec<DateColumn>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self::euctr()
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl SchemaConfig {
    /// Column layout of the EUCTR scrape.
    pub fn euctr() -> Self {
        Self {
            id_column: "eudract_number".to_string(),
            location_column: "trial_location".to_string(),
            phase_column: "phase_1".to_string(),
            delimiter: default_delimiter(),
            dates: vec![
                DateColumn::new("cad", "date_of_competent_authority_decision"),
                DateColumn::new("ethics", "date_of_ethics_committee_opinion"),
                DateColumn::new(
                    "entered",
                    "date_on_which_this_record_was_first_entered_in_the_eudract_data",
                ),
            ],
        }
    }

    /// Column layout of a ClinicalTrials.gov extract.
    pub fn ctgov() -> Self {
        Self {
            id_column: "nct_id".to_string(),
            location_column: "country".to_string(),
            phase_column: "phase".to_string(),
            delimiter: default_delimiter(),
            dates: vec![
                DateColumn::new("start", "start_date"),
                DateColumn::new("submitted", "study_first_submitted_date"),
            ],
        }
    }

    /// Preset for `source`.
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::Euctr => Self::euctr(),
            Source::Ctgov => Self::ctgov(),
        }
    }

    /// Names of all configured date fields.
    pub fn field_names(&self) -> Vec<String> {
        self.dates.iter().map(|d| d.name.clone()).collect()
    }
}

/// Row filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Locations to drop by name.
    #[serde(default)]
    pub exclude_locations: Vec<String>,

    /// Drop locations with fewer trials than this (unset keeps all).
    #[serde(default)]
    pub min_count_per_location: Option<u64>,

    /// Drop the "3rd" (non-EU) location.
    #[serde(default)]
    pub exclude_third_countries: bool,

    /// Drop trials whose phase is exactly "Phase 1".
    #[serde(default = "default_true")]
    pub drop_phase_one_only: bool,

    /// Phase values meaning "Phase 1 only".
    #[serde(default = "default_labels")]
    pub phase_one_labels: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            exclude_locations: Vec::new(),
            min_count_per_location: None,
            exclude_third_countries: false,
            drop_phase_one_only: true,
            phase_one_labels: default_labels(),
        }
    }
}

fn default_labels() -> Vec<String> {
    default_phase_one_labels().into_iter().collect()
}

/// Grouping and period settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Date fields to aggregate; empty means every schema field.
    #[serde(default)]
    pub fields: Vec<String>,

    /// Group counts by location.
    #[serde(default = "default_true")]
    pub group_by_location: bool,

    /// Period granularity.
    #[serde(default)]
    pub granularity: Granularity,

    /// First period included (`YYYY` or `YYYYQn`).
    #[serde(default = "default_start")]
    pub start: String,

    /// First period excluded (`YYYY` or `YYYYQn`).
    #[serde(default = "default_end")]
    pub end: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            group_by_location: true,
            granularity: Granularity::Year,
            start: default_start(),
            end: default_end(),
        }
    }
}

fn default_start() -> String {
    DEFAULT_START_YEAR.to_string()
}

fn default_end() -> String {
    DEFAULT_END_YEAR.to_string()
}

impl AggregationConfig {
    /// Parse and validate the period bounds against the granularity.
    pub fn period_range(&self) -> Result<PeriodRange, TrendsError> {
        let start: Period = self.start.parse()?;
        let end: Period = self.end.parse()?;
        PeriodRange::new(start, end, self.granularity)
    }
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Only chart locations with more trials than this (unset keeps all).
    #[serde(default)]
    pub select_threshold: Option<u64>,

    /// Select locations below the threshold instead of above it.
    #[serde(default)]
    pub select_below: bool,

    /// Location drawn last so it stands out.
    #[serde(default)]
    pub highlight: Option<String>,

    /// Number of locations listed in the totals section.
    #[serde(default = "default_top_locations")]
    pub top_locations: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            select_threshold: None,
            select_below: false,
            highlight: None,
            top_locations: default_top_locations(),
        }
    }
}

fn default_top_locations() -> usize {
    10
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when the CLI provides an explicit value.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // A source preset replaces the whole schema
        if let Some(source) = args.source {
            self.schema = SchemaConfig::for_source(source);
            if source == Source::Ctgov {
                self.aggregation.group_by_location = false;
            }
        }

        if let Some(ref fields) = args.fields {
            self.aggregation.fields = fields.clone();
        }
        if let Some(granularity) = args.granularity {
            self.aggregation.granularity = granularity;
        }
        if args.no_group_by_location {
            self.aggregation.group_by_location = false;
        }
        if let Some(ref start) = args.start {
            self.aggregation.start = start.clone();
        }
        if let Some(ref end) = args.end {
            self.aggregation.end = end.clone();
        }

        if let Some(ref excludes) = args.exclude {
            self.filters.exclude_locations = excludes.clone();
        }
        if let Some(min) = args.min_count {
            self.filters.min_count_per_location = Some(min);
        }
        if args.exclude_third_countries {
            self.filters.exclude_third_countries = true;
        }
        if args.include_phase_one {
            self.filters.drop_phase_one_only = false;
        }

        if let Some(threshold) = args.select_threshold {
            self.report.select_threshold = Some(threshold);
        }
        if args.select_below {
            self.report.select_below = true;
        }
        if let Some(ref highlight) = args.highlight {
            self.report.highlight = Some(highlight.clone());
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
        if args.no_progress || args.quiet {
            self.general.show_progress = false;
        }
    }

    /// Fields to aggregate: the configured list, or every schema field.
    pub fn effective_fields(&self) -> Vec<String> {
        if self.aggregation.fields.is_empty() {
            self.schema.field_names()
        } else {
            self.aggregation.fields.clone()
        }
    }

    /// Build the filter options the aggregator consumes.
    pub fn filter_options(&self) -> Result<FilterOptions, TrendsError> {
        Ok(FilterOptions {
            exclude_locations: self.filters.exclude_locations.iter().cloned().collect(),
            min_count_per_location: self.filters.min_count_per_location,
            exclude_non_region_locations: self.filters.exclude_third_countries,
            drop_phase_one_only: self.filters.drop_phase_one_only,
            phase_one_labels: self
                .filters
                .phase_one_labels
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>(),
            period_range: Some(self.aggregation.period_range()?),
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
