//! Log tailer (C7): watches a file being appended by another process on the
//! same host, emits a recent tail on attach, then streams additions. Tracks
//! the last read offset per watcher so a notification storm (many fs events
//! in a row) never causes a re-read from zero or a dropped line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;

use crate::error::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SUMMARY_WIDTH: usize = 200;

/// A decoded structured child-log event (§4.7). `raw` retains the full
/// parsed JSON for callers that want more than the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_type: String,
    pub summary: String,
    pub raw: serde_json::Value,
}

/// Widths used when truncating event summaries. Callers needing a narrower
/// terminal can override any of these.
#[derive(Debug, Clone, Copy)]
pub struct SummaryWidths {
    pub tool_use: usize,
    pub text: usize,
    pub stdout: usize,
    pub stderr: usize,
}

impl Default for SummaryWidths {
    fn default() -> Self {
        Self {
            tool_use: DEFAULT_SUMMARY_WIDTH,
            text: DEFAULT_SUMMARY_WIDTH,
            stdout: DEFAULT_SUMMARY_WIDTH,
            stderr: DEFAULT_SUMMARY_WIDTH,
        }
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{truncated}\u{2026}")
    }
}

/// Parse one line of the structured child log (one JSON object per line)
/// into a summarized [`LogEvent`]. Returns `None` for blank lines or lines
/// that fail to parse as JSON — the tailer skips those rather than erroring,
/// since a torn line at the end of a growing file is expected, not a fault.
pub fn parse_json_event(line: &str, widths: &SummaryWidths) -> Option<LogEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let event_type = value.get("type")?.as_str()?.to_string();

    let summary = match event_type.as_str() {
        "assistant-message" => {
            if let Some(tool_uses) = value.get("tool_use").and_then(|v| v.as_array()) {
                let names: Vec<String> = tool_uses
                    .iter()
                    .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                    .map(|s| s.to_string())
                    .collect();
                truncate(&format!("tool_use: {}", names.join(", ")), widths.tool_use)
            } else if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                truncate(text, widths.text)
            } else {
                String::new()
            }
        }
        "system-message" => value
            .get("text")
            .and_then(|v| v.as_str())
            .map(|t| truncate(t, widths.text))
            .unwrap_or_default(),
        "tool-result" => {
            let stdout = value.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
            let stderr = value.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
            let mut parts = Vec::new();
            if !stdout.is_empty() {
                parts.push(format!("stdout: {}", truncate(stdout, widths.stdout)));
            }
            if !stderr.is_empty() {
                parts.push(format!("stderr: {}", truncate(stderr, widths.stderr)));
            }
            parts.join(" | ")
        }
        _ => String::new(),
    };

    Some(LogEvent {
        event_type,
        summary,
        raw: value,
    })
}

/// Log level recognized in the raw task-log line format (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Tip,
    Warn,
    Error,
    Critical,
}

impl std::str::FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "TIP" => Ok(Self::Tip),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskLogEntry {
    pub timestamp: String,
    pub task_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub meta: Option<serde_json::Value>,
}

/// Parse `<ISO-UTC> [<T?>] [LEVEL] <message> {{<json-meta>}}`.
pub fn parse_task_log_line(line: &str) -> Option<TaskLogEntry> {
    let line = line.trim();
    let mut rest = line;

    let (timestamp, after_ts) = rest.split_once(' ')?;
    rest = after_ts.trim_start();

    let mut task_id = None;
    if let Some(stripped) = rest.strip_prefix('[') {
        let (bracketed, after) = stripped.split_once(']')?;
        rest = after.trim_start();
        if bracketed.parse::<LogLevel>().is_ok() {
            // The first bracket was actually the level, not a task id.
            let level: LogLevel = bracketed.parse().ok()?;
            let (message, meta) = split_message_meta(rest);
            return Some(TaskLogEntry {
                timestamp: timestamp.to_string(),
                task_id: None,
                level,
                message,
                meta,
            });
        }
        task_id = Some(bracketed.to_string());
    }

    let level_bracket = rest.strip_prefix('[')?;
    let (level_str, after_level) = level_bracket.split_once(']')?;
    let level: LogLevel = level_str.parse().ok()?;
    rest = after_level.trim_start();

    let (message, meta) = split_message_meta(rest);

    Some(TaskLogEntry {
        timestamp: timestamp.to_string(),
        task_id,
        level,
        message,
        meta,
    })
}

fn split_message_meta(rest: &str) -> (String, Option<serde_json::Value>) {
    if let Some(brace_start) = rest.rfind("{{") {
        if let Some(brace_end) = rest.rfind("}}") {
            if brace_end > brace_start {
                let message = rest[..brace_start].trim().to_string();
                let meta_str = &rest[brace_start + 1..brace_end + 1];
                let meta = serde_json::from_str(meta_str).ok();
                return (message, meta);
            }
        }
    }
    (rest.trim().to_string(), None)
}

/// Read the last `n` lines of a file, tolerating a file smaller than `n`
/// lines or a file that doesn't exist yet.
pub async fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = tokio::fs::read_to_string(path).await?;
    let lines: Vec<String> = contents.lines().map(String::from).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}

/// Per-watcher tail state: tracks the last byte offset read so a watcher
/// never replays from zero after a missed notification.
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Resume from a previously persisted offset (e.g. after a restart).
    pub fn at_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read any complete lines appended since the last call. A trailing
    /// partial line (file write in progress) is left for the next poll.
    pub async fn poll(&mut self) -> Result<Vec<String>> {
        let Ok(metadata) = tokio::fs::metadata(&self.path).await else {
            return Ok(Vec::new());
        };
        let len = metadata.len();
        if len < self.offset {
            // File was truncated/rotated; resume from the start.
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let text = String::from_utf8_lossy(&buf);
        let last_newline = text.rfind('\n');
        let (complete, consumed) = match last_newline {
            Some(idx) => (&text[..idx], idx + 1),
            None => ("", 0),
        };

        let lines: Vec<String> = complete.lines().map(String::from).collect();
        self.offset += consumed as u64;
        Ok(lines)
    }

    /// Spawn a background task streaming new lines to the returned channel
    /// at a fixed poll interval, in addition to whatever `notify` events the
    /// caller separately observes via [`crate::state::watch`].
    pub fn stream(mut self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match self.poll().await {
                    Ok(lines) => {
                        for line in lines {
                            if tx.send(line).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(_) => return,
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
        rx
    }
}
