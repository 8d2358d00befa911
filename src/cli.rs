//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::Source;
use crate::models::{Granularity, Period};
use clap::Parser;
use std::path::{Path, PathBuf};

/// TrialTrends - clinical-trial registry trends by country and period
///
/// Counts trials per year or quarter for each date field of a registry
/// export (EUCTR or ClinicalTrials.gov) and writes chart-ready tables.
///
/// Examples:
///   trialtrends --input euctr_april19.csv
///   trialtrends --input euctr_april19.csv --granularity quarter --min-count 1000 --exclude-third-countries
///   trialtrends --input ctgov.csv --source ctgov --format csv -o ctgov_trends.csv
///   trialtrends --input euctr_april19.csv --select-threshold 4000 --highlight GB
///   trialtrends --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Registry export to analyze (`-` reads stdin)
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .trialtrends.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Column layout preset
    ///
    /// Replaces the configured schema. `ctgov` also disables grouping by location.
    #[arg(long, value_name = "SOURCE")]
    pub source: Option<Source>,

    /// Date fields to aggregate (comma-separated)
    ///
    /// Example: --fields cad,ethics
    #[arg(long, value_name = "FIELDS", value_delimiter = ',')]
    pub fields: Option<Vec<String>>,

    /// Period granularity (year, quarter)
    #[arg(short, long, value_name = "GRANULARITY")]
    pub granularity: Option<Granularity>,

    /// Count all locations together instead of one column per location
    #[arg(long)]
    pub no_group_by_location: bool,

    /// First period included (YYYY or YYYYQn)
    #[arg(long, value_name = "PERIOD")]
    pub start: Option<String>,

    /// First period excluded (YYYY or YYYYQn)
    #[arg(long, value_name = "PERIOD")]
    pub end: Option<String>,

    /// Locations to exclude (comma-separated)
    #[arg(long, value_name = "LOCATIONS", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Drop locations with fewer trials than this in the whole export
    #[arg(long, value_name = "COUNT")]
    pub min_count: Option<u64>,

    /// Drop trials located in non-EU "3rd" countries
    #[arg(long)]
    pub exclude_third_countries: bool,

    /// Keep trials whose phase is "Phase 1" only
    #[arg(long)]
    pub include_phase_one: bool,

    /// Only report locations with more trials than this
    #[arg(long, value_name = "COUNT")]
    pub select_threshold: Option<u64>,

    /// Select locations below --select-threshold instead of above it
    #[arg(long, requires = "select_threshold")]
    pub select_below: bool,

    /// Location moved to the last column
    #[arg(long, value_name = "LOCATION")]
    pub highlight: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json, csv)
    ///
    /// Inferred from the output extension when omitted.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Hide the loading spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Generate a default .trialtrends.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl OutputFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "md" | "markdown" => Some(OutputFormat::Markdown),
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether the input should be read from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.input.as_deref() == Some(Path::new("-"))
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate period bounds early so typos fail before loading
        for bound in [&self.start, &self.end].into_iter().flatten() {
            if let Err(e) = bound.parse::<Period>() {
                return Err(e.to_string());
            }
        }

        if let Some(ref fields) = self.fields {
            if fields.iter().any(|f| f.trim().is_empty()) {
                return Err("Field names must not be empty".to_string());
            }
        }

        // Validate input file if provided
        if let Some(ref input) = self.input {
            if !self.reads_stdin() {
                if !input.exists() {
                    return Err(format!("Input file does not exist: {}", input.display()));
                }
                if !input.is_file() {
                    return Err(format!("Input path is not a file: {}", input.display()));
                }
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Returns the report format: explicit flag, then output extension, then markdown.
    pub fn effective_format(&self, output: &Path) -> OutputFormat {
        self.format
            .or_else(|| OutputFormat::from_path(output))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            input: Some(PathBuf::from("-")),
            config: None,
            source: None,
            fields: None,
            granularity: None,
            no_group_by_location: false,
            start: None,
            end: None,
            exclude: None,
            min_count: None,
            exclude_third_countries: false,
            include_phase_one: false,
            select_threshold: None,
            select_below: false,
            highlight: None,
            output: None,
            format: None,
            verbose: false,
            quiet: false,
            no_progress: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "trialtrends",
            "--input",
            "-",
            "--granularity",
            "quarter",
            "--fields",
            "cad,ethics",
            "--exclude",
            "3rd,NO",
            "--source",
            "ctgov",
            "--format",
            "csv",
        ])
        .unwrap();

        assert_eq!(args.granularity, Some(Granularity::Quarter));
        assert_eq!(args.fields, Some(vec!["cad".to_string(), "ethics".to_string()]));
        assert_eq!(args.exclude.as_ref().map(Vec::len), Some(2));
        assert_eq!(args.source, Some(Source::Ctgov));
        assert_eq!(args.format, Some(OutputFormat::Csv));
    }

    #[test]
    fn test_input_required() {
        assert!(Args::try_parse_from(["trialtrends"]).is_err());
        assert!(Args::try_parse_from(["trialtrends", "--init-config"]).is_ok());
    }

    #[test]
    fn test_select_below_requires_threshold() {
        assert!(Args::try_parse_from(["trialtrends", "-i", "-", "--select-below"]).is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_bad_period() {
        let mut args = make_args();
        args.start = Some("2008Q7".to_string());
        assert!(args.validate().is_err());

        args.start = Some("2008Q2".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_input() {
        let mut args = make_args();
        args.input = Some(PathBuf::from("/definitely/not/here.csv"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_effective_format() {
        let mut args = make_args();
        assert_eq!(
            args.effective_format(Path::new("out.json")),
            OutputFormat::Json
        );
        assert_eq!(
            args.effective_format(Path::new("out.txt")),
            OutputFormat::Markdown
        );

        args.format = Some(OutputFormat::Csv);
        assert_eq!(
            args.effective_format(Path::new("out.json")),
            OutputFormat::Csv
        );
    }
}
