//! Generation progress reporting.
//!
//! Reports what `qshard generate` is doing so operators see which space is
//! being written and how far along it is. Progress goes to **stderr** so
//! stdout stays parseable for scripts; diagnostic logs go through `tracing`.

use std::io::Write;

/// Emit a `Writing` event every this many files (plus once at the end).
pub const WRITE_REPORT_EVERY: usize = 4096;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Reading the corpus from `source`.
    Loading { source: String },
    /// A space was planned.
    Planned {
        space: String,
        width: u32,
        capacity: u64,
    },
    /// `n` of `total` shard files staged for `space`.
    Writing { space: String, n: u64, total: u64 },
    /// `space` was swapped into the output tree.
    Published { space: String, files: u64 },
}

/// Receives progress events. Called from worker threads.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "write a  4,096 / 65,536 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Loading { source } => format!("load {}\n", source),
            ProgressEvent::Planned {
                space,
                width,
                capacity,
            } => format!(
                "plan {}  width {}  {} addresses\n",
                space,
                width,
                format_number(*capacity)
            ),
            ProgressEvent::Writing { space, n, total } => format!(
                "write {}  {} / {} files\n",
                space,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Published { space, files } => {
                format!("publish {}  {} files\n", space, format_number(*files))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Loading { source } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "source": source
            }),
            ProgressEvent::Planned {
                space,
                width,
                capacity,
            } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "space": space,
                "width": width,
                "capacity": capacity
            }),
            ProgressEvent::Writing { space, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "writing",
                "space": space,
                "n": n,
                "total": total
            }),
            ProgressEvent::Published { space, files } => serde_json::json!({
                "event": "progress",
                "phase": "published",
                "space": space,
                "files": files
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

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}
