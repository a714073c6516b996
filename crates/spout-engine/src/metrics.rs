//! Invocation telemetry recorder.
//!
//! Appends one row per invocation that reached backend selection, whether it
//! succeeded or failed. Telemetry is best effort: write failures are logged
//! and counted, never returned to the caller. Observer writes run on the
//! blocking pool.

use crate::engine::ExecutionError;
use crate::observer::{Invocation, InvocationObserver, InvocationTrace};
use async_trait::async_trait;
use chrono::Local;
use spout_core::fingerprint::fingerprint;
use spout_core::{ExecutionResult, MetricsRow, MetricsWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MetricsWriteError {
    #[error("failed to open metrics store {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to metrics store {}: {source}", path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics write task failed: {0}")]
    Task(String),
}

/// Observer persisting a [`MetricsRow`] per invocation.
#[derive(Debug)]
pub struct MetricsRecorder {
    path: PathBuf,
    /// Opened on the first row; reopened after a failed open.
    writer: Arc<Mutex<Option<MetricsWriter>>>,
    rows_written: AtomicUsize,
    rows_skipped: AtomicUsize,
    write_failures: AtomicUsize,
}

impl MetricsRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Arc::new(Mutex::new(None)),
            rows_written: AtomicUsize::new(0),
            rows_skipped: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the row for a finished invocation, or `None` without a model id.
    pub fn row_for(
        invocation: &Invocation,
        trace: &InvocationTrace,
        outcome: Result<&ExecutionResult, &ExecutionError>,
    ) -> Option<MetricsRow> {
        let model_id = trace.model.clone()?;
        let skill_name = trace.qualified_name.clone().unwrap_or_default();

        let (input_tokens, output_tokens, output_hash) = match outcome {
            Ok(result) => (
                result.input_tokens,
                result.output_tokens,
                fingerprint(&result.output),
            ),
            Err(error) => (
                trace.prompt_tokens.unwrap_or(0),
                0,
                fingerprint(&error.to_string()),
            ),
        };

        Some(MetricsRow {
            started_at: invocation.started_at.with_timezone(&Local),
            duration_secs: trace.duration.as_secs_f64(),
            model_id,
            skill_name,
            input_tokens,
            output_tokens,
            input_hash: invocation.input_hash.clone(),
            output_hash,
        })
    }

    /// Append `row`, opening the store if needed. Blocks on file I/O.
    pub fn record(&self, row: &MetricsRow) -> Result<(), MetricsWriteError> {
        append_row(&self.writer, &self.path, row)
    }

    /// Append `row` from the blocking pool.
    async fn record_blocking(&self, row: MetricsRow) -> Result<(), MetricsWriteError> {
        let writer = Arc::clone(&self.writer);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_row(&writer, &path, &row))
            .await
            .map_err(|e| MetricsWriteError::Task(e.to_string()))?
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn rows_skipped(&self) -> usize {
        self.rows_skipped.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> usize {
        self.write_failures.load(Ordering::Relaxed)
    }
}

fn append_row(
    writer: &Mutex<Option<MetricsWriter>>,
    path: &Path,
    row: &MetricsRow,
) -> Result<(), MetricsWriteError> {
    let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);

    if guard.is_none() {
        let opened = MetricsWriter::open(path).map_err(|source| MetricsWriteError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "opened metrics store");
        *guard = Some(opened);
    }

    if let Some(opened) = guard.as_mut() {
        opened
            .append(row)
            .map_err(|source| MetricsWriteError::Append {
                path: path.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

#[async_trait]
impl InvocationObserver for MetricsRecorder {
    async fn on_finish(
        &self,
        invocation: &Invocation,
        trace: &InvocationTrace,
        outcome: Result<&ExecutionResult, &ExecutionError>,
    ) {
        let Some(row) = Self::row_for(invocation, trace, outcome) else {
            self.rows_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(invocation = %invocation.id, "no model id, metrics row skipped");
            return;
        };

        match self.record_blocking(row).await {
            Ok(()) => {
                self.rows_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(invocation = %invocation.id, error = %e, "failed to record metrics");
            }
        }
    }
}
