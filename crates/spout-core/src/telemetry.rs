//! Append-only invocation telemetry in TSV form.
//!
//! Columns: `start_time`, `duration_s`, `model_id`, `skill_name`,
//!          `input_tokens`, `output_tokens`, `input_hash`, `output_hash`

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Start time format of the `start_time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// TSV header row.
pub const HEADER: &str = "start_time\tduration_s\tmodel_id\tskill_name\tinput_tokens\toutput_tokens\tinput_hash\toutput_hash";

/// A single row of the telemetry store.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    pub started_at: DateTime<Local>,
    pub duration_secs: f64,
    pub model_id: String,
    /// Qualified skill name, e.g. `translate:formal*`.
    pub skill_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_hash: String,
    pub output_hash: String,
}

impl MetricsRow {
    /// Format as a TSV line, including the trailing newline.
    pub fn to_tsv_line(&self) -> String {
        format!(
            "{}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            self.started_at.format(TIME_FORMAT),
            self.duration_secs,
            sanitize_field(&self.model_id),
            sanitize_field(&self.skill_name),
            self.input_tokens,
            self.output_tokens,
            sanitize_field(&self.input_hash),
            sanitize_field(&self.output_hash),
        )
    }
}

/// Sanitize a field value to prevent TSV breakage.
fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Appending writer for the telemetry store.
///
/// The header check and every row write run under an exclusive advisory
/// lock on the file, so writers in other recorders or processes never
/// duplicate the header or interleave rows.
pub struct MetricsWriter {
    file: File,
}

impl std::fmt::Debug for MetricsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsWriter")
            .field("file", &"File")
            .finish()
    }
}

impl MetricsWriter {
    /// Open the store for appending, creating it (and its directory) if
    /// needed. The header is written only when the file is empty.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        with_lock(&mut file, |file| {
            if file.metadata()?.len() == 0 {
                file.write_all(format!("{HEADER}\n").as_bytes())?;
            }
            Ok(())
        })?;

        Ok(Self { file })
    }

    /// Append a single row.
    pub fn append(&mut self, row: &MetricsRow) -> io::Result<()> {
        let line = row.to_tsv_line();
        with_lock(&mut self.file, |file| file.write_all(line.as_bytes()))
    }
}

/// Run `f` while holding an exclusive lock on `file`.
fn with_lock<T>(file: &mut File, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
    file.lock()?;
    let result = f(file);
    let unlocked = file.unlock();
    let value = result?;
    unlocked?;
    Ok(value)
}
