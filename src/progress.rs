//! Operator-facing progress reporting.
//!
//! Long runs (tens of thousands of candidate files) report where they are:
//! which stage is running and how many items it has finished. Progress is
//! emitted on **stderr** so stdout stays parseable for scripts. Diagnostic
//! logging goes through `tracing`; this channel is only for progress.

use std::io::Write;

use crate::pipeline::Stage;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted { stage: Stage },
    StageSkipped { stage: Stage },
    Progress { stage: Stage, completed: u64, total: u64 },
    StageFinished { stage: Stage, summary: String },
}

/// Receives progress events. Implementations must be cheap; they are
/// called from the stage's collecting task.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "categorize  1,250 / 5,000 (25.0%)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::StageStarted { stage } => {
                format!("==> {}\n", stage)
            }
            ProgressEvent::StageSkipped { stage } => {
                format!("==> {} (skipped)\n", stage)
            }
            ProgressEvent::Progress {
                stage,
                completed,
                total,
            } => {
                let pct = if *total > 0 {
                    *completed as f64 * 100.0 / *total as f64
                } else {
                    100.0
                };
                format!(
                    "{}  {} / {} ({:.1}%)\n",
                    stage,
                    format_number(*completed),
                    format_number(*total),
                    pct
                )
            }
            ProgressEvent::StageFinished { stage, summary } => {
                format!("{}  done: {}\n", stage, summary)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::StageStarted { stage } => serde_json::json!({
                "event": "stage_started",
                "stage": stage.to_string(),
            }),
            ProgressEvent::StageSkipped { stage } => serde_json::json!({
                "event": "stage_skipped",
                "stage": stage.to_string(),
            }),
            ProgressEvent::Progress {
                stage,
                completed,
                total,
            } => serde_json::json!({
                "event": "progress",
                "stage": stage.to_string(),
                "completed": completed,
                "total": total,
            }),
            ProgressEvent::StageFinished { stage, summary } => serde_json::json!({
                "event": "stage_finished",
                "stage": stage.to_string(),
                "summary": summary,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Emit a [`ProgressEvent::Progress`] every `every` completions and on the last one.
pub fn report_every(
    reporter: &dyn ProgressReporter,
    stage: Stage,
    completed: usize,
    total: usize,
    every: usize,
) {
    if completed == total || (every > 0 && completed % every == 0) {
        reporter.report(ProgressEvent::Progress {
            stage,
            completed: completed as u64,
            total: total as u64,
        });
    }
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

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Auto => {
                if atty::is(atty::Stream::Stderr) {
                    Box::new(StderrProgress)
                } else {
                    Box::new(NoProgress)
                }
            }
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
