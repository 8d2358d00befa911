//! Trial export loader.
//!
//! This module reads a delimited registry export into a [`TrialTable`],
//! mapping the configured column headers onto the record schema and
//! parsing every date column permissively.

pub mod dates;

pub use dates::parse_date;

use crate::config::{DateColumn, SchemaConfig};
use crate::error::TrendsError;
use crate::models::{TrialRecord, TrialTable};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column layout expected in the input file.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Header of the trial identifier column.
    pub id_column: String,
    /// Header of the location column.
    pub location_column: String,
    /// Header of the phase column.
    pub phase_column: String,
    /// Date fields, in the order they are reported.
    pub dates: Vec<DateColumn>,
    /// Field delimiter.
    pub delimiter: u8,
}

impl TryFrom<&SchemaConfig> for TableSchema {
    type Error = anyhow::Error;

    fn try_from(config: &SchemaConfig) -> Result<Self> {
        let delimiter = match config.delimiter.as_bytes() {
            [b] => *b,
            _ => anyhow::bail!(
                "Delimiter must be a single byte, got '{}'",
                config.delimiter
            ),
        };

        Ok(Self {
            id_column: config.id_column.clone(),
            location_column: config.location_column.clone(),
            phase_column: config.phase_column.clone(),
            dates: config.dates.clone(),
            delimiter,
        })
    }
}

/// Positions of the schema columns within one file's header row.
struct ColumnIndex {
    id: usize,
    location: usize,
    phase: usize,
    dates: Vec<(String, usize)>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, schema: &TableSchema, source: &Path) -> Result<Self> {
        let find = |column: &str| -> Result<usize, TrendsError> {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
                .ok_or_else(|| TrendsError::MissingColumn {
                    column: column.to_string(),
                    path: source.to_path_buf(),
                })
        };

        // Schema order, so the first missing column reported is the first one declared
        let id = find(&schema.id_column)?;
        let location = find(&schema.location_column)?;
        let phase = find(&schema.phase_column)?;

        let mut dates = Vec::with_capacity(schema.dates.len());
        for date in &schema.dates {
            dates.push((date.name.clone(), find(&date.column)?));
        }

        Ok(Self {
            id,
            location,
            phase,
            dates,
        })
    }
}

/// Load a trial export from `path`.
pub fn load_trials(path: &Path, schema: &TableSchema, show_progress: bool) -> Result<TrialTable> {
    info!("Loading trials from: {}", path.display());

    let file =
        File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;

    read_trials(file, path, schema, show_progress)
}

/// Read a trial export from any reader. `source` is only used in messages.
pub fn read_trials<R: Read>(
    reader: R,
    source: &Path,
    schema: &TableSchema,
    show_progress: bool,
) -> Result<TrialTable> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(schema.delimiter)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header row of {}", source.display()))?
        .clone();
    let index = ColumnIndex::resolve(&headers, schema, source)?;

    let progress = show_progress.then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} rows read")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb
    });

    let mut table = TrialTable::new(schema.dates.iter().map(|d| d.name.clone()));
    let mut unparsed: BTreeMap<&str, usize> = BTreeMap::new();

    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| {
            format!("CSV parse error in {} at record {}", source.display(), idx)
        })?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let mut trial = TrialRecord::new(cell(index.id), cell(index.location), cell(index.phase));
        for (name, col) in &index.dates {
            let raw = cell(*col);
            let parsed = parse_date(raw);
            if parsed.is_none() && !raw.is_empty() {
                *unparsed.entry(name.as_str()).or_default() += 1;
            }
            trial.dates.insert(name.clone(), parsed);
        }
        table.push(trial);

        if let Some(ref pb) = progress {
            if idx % 1000 == 0 {
                pb.set_position(idx as u64);
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    for (field, count) in &unparsed {
        debug!(field, count, "unparseable dates treated as missing");
    }
    info!("Loaded {} trials from {}", table.len(), source.display());

    Ok(table)
}

/// Path helper used when reading from stdin or in-memory buffers.
pub fn unnamed_source() -> PathBuf {
    PathBuf::from("<input>")
}
