//! TrialTrends - clinical-trial registry trend tables
//!
//! A CLI tool that loads EUCTR or ClinicalTrials.gov exports, counts
//! trials per country and period for each date field, and writes
//! chart-ready pivot tables.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Error (bad arguments, config, missing columns, I/O)

mod analysis;
mod cli;
mod config;
mod error;
mod loader;
mod models;
mod report;

use analysis::{aggregate, select_locations, top_locations, Relation};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, CONFIG_FILE};
use loader::{load_trials, read_trials, unnamed_source, TableSchema};
use models::{PeriodRange, Report, ReportMetadata, TrialTable};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("TrialTrends v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args) {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .trialtrends.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize columns, filters, and periods.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }
}

/// Load, aggregate, and write the report.
fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let schema = TableSchema::try_from(&config.schema)?;
    let fields = config.effective_fields();
    let filters = config.filter_options()?;
    let granularity = config.aggregation.granularity;
    let group_by_location = config.aggregation.group_by_location;

    // Step 1: Load the export
    let table = load_input(&args, &schema, config.general.show_progress)?;
    if table.is_empty() {
        warn!("Input contains no trials");
    }

    // Step 2: Aggregate every requested field
    info!(
        "Aggregating {} by {} ({} fields)",
        if group_by_location { "location" } else { "total" },
        granularity,
        fields.len()
    );
    let mut pivots = aggregate(&table, &fields, group_by_location, granularity, &filters)?;

    // Step 3: Column selection for charting
    let selected = config.report.select_threshold.map(|threshold| {
        let relation = if config.report.select_below {
            Relation::Below
        } else {
            Relation::Above
        };
        select_locations(
            &table,
            threshold,
            relation,
            config.filters.exclude_third_countries,
        )
    });

    if let Some(ref keep) = selected {
        info!("{} locations selected", keep.len());
        for pivot in &mut pivots {
            pivot.table = pivot.table.select_columns(keep);
        }
    }

    if let Some(ref highlight) = config.report.highlight {
        let moved = pivots
            .iter_mut()
            .fold(false, |found, p| p.table.move_column_last(highlight) || found);
        if !moved && group_by_location {
            warn!("Highlighted location {} is not a column", highlight);
        }
    }

    // Step 4: Build and write the report
    let metadata = ReportMetadata {
        input: input_label(&args),
        generated_at: Utc::now(),
        rows_loaded: table.len(),
        granularity,
        period_range: filters
            .period_range
            .unwrap_or_else(|| PeriodRange::default_for(granularity)),
        group_by_location,
        filters: filters.clone(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };

    let report = Report {
        metadata,
        location_totals: top_locations(&table, config.report.top_locations, false),
        selected_locations: selected,
        pivots,
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));
    let format = args.effective_format(&output);
    report::write_report(&report, format, &output)?;

    if !args.quiet {
        println!("\n📊 Trend Summary:");
        println!("   Trials loaded: {}", report.metadata.rows_loaded);
        println!("   Periods: {} {}", granularity, report.metadata.period_range);
        for pivot in &report.pivots {
            let total: u64 = pivot.table.column_totals().iter().map(|(_, n)| n).sum();
            println!(
                "   - {}: {} trials across {} columns",
                pivot.field,
                total,
                pivot.table.columns.len()
            );
        }
        println!("\n✅ Report saved to: {}", output.display());
    }

    Ok(())
}

/// Read the trial table from the input file or stdin.
fn load_input(args: &Args, schema: &TableSchema, show_progress: bool) -> Result<TrialTable> {
    if args.reads_stdin() {
        let stdin = std::io::stdin();
        return read_trials(stdin.lock(), &unnamed_source(), schema, false);
    }

    let path = args
        .input
        .as_deref()
        .context("No input file given (use --input)")?;
    load_trials(path, schema, show_progress)
}

fn input_label(args: &Args) -> String {
    args.input
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| unnamed_source().display().to_string())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
