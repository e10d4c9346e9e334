//! Indexing progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for
//! scripts. Reporters receive events at batch boundaries from the
//! background indexing task; they must be cheap and non-blocking.

use std::io::Write;

/// A single progress event from an indexing run.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Collection and synchronizer are being prepared. Totals unknown.
    Preparing { path: String },
    /// Files are being split, embedded, and upserted.
    Indexing {
        path: String,
        processed_files: u64,
        total_files: u64,
        /// `processed / total · 100`, rounded to one decimal.
        percentage: f64,
    },
    /// The run finished and the snapshot says `indexed`.
    Completed {
        path: String,
        indexed_files: u64,
        total_chunks: u64,
    },
    /// The run failed and the snapshot says `indexfailed`.
    Failed { path: String, message: String },
}

/// Reports indexing progress. Implementations write to stderr.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: &IndexProgressEvent);
}

/// Human-friendly progress: `index /path  42.0%  (21 / 50 files)`.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let line = match event {
            IndexProgressEvent::Preparing { path } => {
                format!("index {}  preparing...\n", path)
            }
            IndexProgressEvent::Indexing {
                path,
                processed_files,
                total_files,
                percentage,
            } => format!(
                "index {}  {:.1}%  ({} / {} files)\n",
                path,
                percentage,
                format_number(*processed_files),
                format_number(*total_files)
            ),
            IndexProgressEvent::Completed {
                path,
                indexed_files,
                total_chunks,
            } => format!(
                "index {}  done  ({} files, {} chunks)\n",
                path,
                format_number(*indexed_files),
                format_number(*total_chunks)
            ),
            IndexProgressEvent::Failed { path, message } => {
                format!("index {}  failed: {}\n", path, message)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let obj = match event {
            IndexProgressEvent::Preparing { path } => serde_json::json!({
                "event": "progress",
                "phase": "preparing",
                "path": path,
            }),
            IndexProgressEvent::Indexing {
                path,
                processed_files,
                total_files,
                percentage,
            } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "path": path,
                "processedFiles": processed_files,
                "totalFiles": total_files,
                "percentage": percentage,
            }),
            IndexProgressEvent::Completed {
                path,
                indexed_files,
                total_chunks,
            } => serde_json::json!({
                "event": "progress",
                "phase": "completed",
                "path": path,
                "indexedFiles": indexed_files,
                "totalChunks": total_chunks,
            }),
            IndexProgressEvent::Failed { path, message } => serde_json::json!({
                "event": "progress",
                "phase": "failed",
                "path": path,
                "message": message,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: &IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len().saturating_sub(1)) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
