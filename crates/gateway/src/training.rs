//! Training-metric summaries for charting.
//!
//! Sources are tried in order and the first one that yields a summary wins:
//! a precomputed JSON summary, then the raw results log written during
//! training. When neither is usable the summary is a single `note` entry.
//! Unreadable sources are logged and skipped, never reported to clients.

use serde_json::{Map, Number, Value};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Results-log columns worth charting, in output order.
pub const RECOGNIZED_COLUMNS: [&str; 8] = [
    "epoch",
    "train/box_loss",
    "train/cls_loss",
    "train/dfl_loss",
    "metrics/precision(B)",
    "metrics/recall(B)",
    "metrics/mAP50(B)",
    "metrics/mAP50-95(B)",
];

/// Metric name to per-epoch values.
pub type MetricsSummary = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsSource {
    /// JSON object returned as-is
    Summary(PathBuf),
    /// CSV with a header row, one row per epoch
    ResultsLog(PathBuf),
}

#[derive(Debug, Error)]
enum SourceError {
    #[error("file not found")]
    Missing,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("summary is not a JSON object")]
    NotAnObject,

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("results log has no header row")]
    NoHeader,

    #[error("row {row} has {fields} fields, header has {expected}")]
    LongRow {
        row: usize,
        fields: usize,
        expected: usize,
    },
}

impl MetricsSource {
    pub fn path(&self) -> &Path {
        match self {
            MetricsSource::Summary(path) | MetricsSource::ResultsLog(path) => path,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetricsSource::Summary(_) => "summary",
            MetricsSource::ResultsLog(_) => "results_log",
        }
    }

    /// Reads this source, or `None` when it is missing or unusable.
    pub fn load(&self) -> Option<MetricsSummary> {
        let result = match self {
            MetricsSource::Summary(path) => read_summary(path),
            MetricsSource::ResultsLog(path) => read_results_log(path),
        };

        match result {
            Ok(summary) => {
                tracing::debug!(
                    source = self.kind(),
                    path = %self.path().display(),
                    metrics = summary.len(),
                    "Loaded training metrics"
                );
                Some(summary)
            }
            Err(SourceError::Missing) => {
                tracing::debug!(
                    source = self.kind(),
                    path = %self.path().display(),
                    "Training metrics source not present"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    source = self.kind(),
                    path = %self.path().display(),
                    error = %e,
                    "Ignoring unreadable training metrics source"
                );
                None
            }
        }
    }
}

/// Ordered fallback over the configured metric sources.
#[derive(Debug, Clone)]
pub struct MetricsLoader {
    sources: Vec<MetricsSource>,
}

impl MetricsLoader {
    pub fn new(sources: Vec<MetricsSource>) -> Self {
        Self { sources }
    }

    /// Summary file first, results log second
    pub fn from_paths(summary: impl Into<PathBuf>, results_log: impl Into<PathBuf>) -> Self {
        Self::new(vec![
            MetricsSource::Summary(summary.into()),
            MetricsSource::ResultsLog(results_log.into()),
        ])
    }

    pub fn sources(&self) -> &[MetricsSource] {
        &self.sources
    }

    pub fn load(&self) -> MetricsSummary {
        load_training_metrics(&self.sources)
    }
}

/// First summary any source yields, else a single-entry `note`.
pub fn load_training_metrics(sources: &[MetricsSource]) -> MetricsSummary {
    sources
        .iter()
        .find_map(MetricsSource::load)
        .unwrap_or_else(|| no_metrics_note(sources))
}

fn no_metrics_note(sources: &[MetricsSource]) -> MetricsSummary {
    let places = sources
        .iter()
        .map(|source| source.path().display().to_string())
        .collect::<Vec<_>>()
        .join(" or ");

    let mut note = Map::new();
    note.insert(
        "note".to_string(),
        Value::String(format!("No metrics found yet. Place {places}")),
    );
    note
}

fn open(path: &Path) -> Result<File, SourceError> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceError::Missing,
        _ => SourceError::Io(e),
    })
}

fn read_summary(path: &Path) -> Result<MetricsSummary, SourceError> {
    let file = open(path)?;

    match serde_json::from_reader(BufReader::new(file))? {
        Value::Object(summary) => Ok(summary),
        _ => Err(SourceError::NotAnObject),
    }
}

fn read_results_log(path: &Path) -> Result<MetricsSummary, SourceError> {
    let file = open(path)?;

    // Older trainers pad header names with spaces. Short rows appear while an
    // epoch is still being written; their missing cells become null.
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(SourceError::NoHeader);
    }

    let selected: Vec<(&str, usize)> = RECOGNIZED_COLUMNS
        .iter()
        .filter_map(|name| {
            headers
                .iter()
                .position(|header| header == *name)
                .map(|index| (*name, index))
        })
        .collect();

    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); selected.len()];

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() > headers.len() {
            return Err(SourceError::LongRow {
                row: row + 1,
                fields: record.len(),
                expected: headers.len(),
            });
        }
        for ((_, index), column) in selected.iter().zip(columns.iter_mut()) {
            column.push(parse_cell(record.get(*index).unwrap_or_default()));
        }
    }

    Ok(selected
        .into_iter()
        .zip(columns)
        .map(|((name, _), values)| (name.to_string(), Value::Array(values)))
        .collect())
}

/// Integer, else float, else the raw text; blanks and NaN become null.
fn parse_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    match cell.parse::<f64>() {
        Ok(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        Err(_) => Value::String(cell.to_string()),
    }
}
