//! Build progress events and reporters.
//!
//! The builder emits typed [`BuildProgress`] events on a channel; it never
//! calls back into its caller. The job controller keeps the latest event as
//! the job's progress snapshot, and the CLI renders events on **stderr** so
//! stdout remains parseable for scripts.

use serde::{Deserialize, Serialize};
use std::io::Write;

/// A single progress event of an index build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BuildProgress {
    /// Enumerating source documents. Total unknown.
    Collecting,
    /// `n` of `total` documents processed (reused, read or skipped).
    Scanning { n: u64, total: u64 },
    /// `done` of `total` chunks embedded.
    Embedding { done: u64, total: u64 },
    /// Persisting the index and meta files.
    Writing { items: u64 },
}

/// Renders build progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &BuildProgress);
}

/// Human-friendly progress on stderr: "build  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &BuildProgress) {
        let line = match event {
            BuildProgress::Collecting => "build  collecting documents...\n".to_string(),
            BuildProgress::Scanning { n, total } => format!(
                "build  scanning  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgress::Embedding { done, total } => format!(
                "build  embedding  {} / {} chunks\n",
                format_number(*done),
                format_number(*total)
            ),
            BuildProgress::Writing { items } => {
                format!("build  writing  {} items\n", format_number(*items))
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &BuildProgress) {
        let mut obj = serde_json::json!({ "event": "progress" });
        if let (Ok(serde_json::Value::Object(fields)), Some(target)) =
            (serde_json::to_value(event), obj.as_object_mut())
        {
            target.extend(fields);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &BuildProgress) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
