//! Append-only output files: JSON lines and CSV.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::construction::{ConstructionType, FormatType};
use crate::scoring::ResultRow;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
}

fn open_append(path: &Path) -> Result<File, PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

// =============================================================================
// JSONL
// =============================================================================

/// Appends one JSON object per line. Existing content is never rewritten.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), PersistError> {
        let line = serde_json::to_string(record).map_err(|e| PersistError::Serde(e.to_string()))?;
        writeln!(self.writer, "{line}")?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), PersistError> {
        self.writer.flush()?;
        Ok(())
    }
}

// =============================================================================
// CSV
// =============================================================================

/// A row type that can be appended to a CSV file.
pub trait CsvRecord {
    fn header() -> &'static [&'static str];
    fn fields(&self) -> Vec<String>;
}

/// Quote a field when it contains a delimiter, quote, or line break.
pub fn csv_field(raw: &str) -> String {
    if raw.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_line(fields: impl IntoIterator<Item = String>) -> String {
    fields
        .into_iter()
        .map(|f| csv_field(&f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Append rows; the header goes in only when the file did not exist yet.
pub fn append_csv_rows<R: CsvRecord>(path: impl AsRef<Path>, rows: &[R]) -> Result<(), PersistError> {
    let path = path.as_ref();
    let is_new = !path.exists();
    let mut writer = BufWriter::new(open_append(path)?);

    if is_new {
        writeln!(
            writer,
            "{}",
            csv_line(R::header().iter().map(|h| h.to_string()))
        )?;
    }
    for row in rows {
        writeln!(writer, "{}", csv_line(row.fields()))?;
    }
    writer.flush()?;
    Ok(())
}

impl CsvRecord for ResultRow {
    fn header() -> &'static [&'static str] {
        &[
            "construction_type",
            "salient_task",
            "format_type",
            "construction",
            "task_a_label",
            "task_b_label",
            "active_task_label",
            "tokens",
            "%",
            "top_k_probs",
            "accurate",
            "example_number",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.construction_type.to_string(),
            self.salient_task.map(|t| t.to_string()).unwrap_or_default(),
            self.format_type.to_string(),
            self.construction.clone(),
            self.task_a_label.to_string(),
            self.task_b_label.to_string(),
            self.active_task_label.to_string(),
            self.token.clone(),
            self.percent.to_string(),
            serde_json::to_string(&self.top_k).unwrap_or_default(),
            (self.accurate as u8).to_string(),
            self.example_number.to_string(),
        ]
    }
}

/// Expected answer for one offline inference request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionRow {
    pub index: usize,
    pub solution: String,
    /// Links the row to its request line.
    pub prompt_hash: String,
}

impl CsvRecord for SolutionRow {
    fn header() -> &'static [&'static str] {
        &["index", "solution", "prompt_hash"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.solution.clone(),
            self.prompt_hash.clone(),
        ]
    }
}

// =============================================================================
// Paths
// =============================================================================

pub fn prompt_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// `{dir}/{YYYY-MM-DD_HH-MM-SS}_{suffix}`.
pub fn timestamped_path(dir: impl AsRef<Path>, now: DateTime<Local>, suffix: &str) -> PathBuf {
    dir.as_ref()
        .join(format!("{}_{suffix}", now.format("%Y-%m-%d_%H-%M-%S")))
}

/// `{root}/{model}/{construction_type}/{format}_{shots}_{iteration}.csv`.
pub fn results_csv_path(
    root: impl AsRef<Path>,
    model: &str,
    construction_type: ConstructionType,
    format: FormatType,
    shots: usize,
    iteration: usize,
) -> PathBuf {
    root.as_ref()
        .join(model)
        .join(construction_type.as_str())
        .join(format!("{}_{shots}_{iteration}.csv", format.as_str()))
}
