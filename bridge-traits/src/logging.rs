//! Logging Abstractions
//!
//! Logger sink for forwarding structured logs to a host pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// One forwarded `tracing` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path of the emitting code, e.g. `core_playback::engine`
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Enclosing span names, outermost first, joined with `::`
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<5} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.target,
            self.message
        )?;
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        for key in keys {
            write!(f, " {}={}", key, self.fields[key])?;
        }
        Ok(())
    }
}

/// Receives structured logs from the core, e.g. for a log panel in the host UI.
///
/// Synthesis text only reaches logs through
/// `core_runtime::logging::text_preview`; sinks should not add it back.
#[async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Entries below this level are never built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Keeps entries in memory, optionally only the most recent `capacity`.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: Option<usize>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the latest `capacity` entries and drop older ones.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl LoggerSink for MemoryLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(capacity) = self.capacity {
            while entries.len() >= capacity {
                entries.pop_front();
            }
        }
        entries.push_back(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry::new(LogLevel::Warn, "core_playback::engine", "chunk skipped")
            .with_field("sequence", "2")
            .with_field("attempt", "3")
            .with_span_id("speak::session");

        let line = entry.to_string();
        assert!(line.ends_with("WARN  core_playback::engine: chunk skipped attempt=3 sequence=2"));
        assert_eq!(entry.span_id.as_deref(), Some("speak::session"));
    }

    #[test]
    fn test_level_ordering_and_serde() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
    }

    #[tokio::test]
    async fn test_memory_logger_records_entries() {
        let logger = MemoryLogger::new();
        logger
            .log(LogEntry::new(LogLevel::Warn, "core_playback", "chunk 2 skipped"))
            .await
            .unwrap();

        assert_eq!(logger.entries().len(), 1);
        assert!(logger.contains("skipped"));
        assert!(!logger.contains("finalized"));

        logger.clear();
        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_logger_keeps_latest() {
        let logger = MemoryLogger::bounded(2);
        for sequence in 0..4 {
            logger
                .log(LogEntry::new(LogLevel::Debug, "core_playback", format!("chunk {}", sequence)))
                .await
                .unwrap();
        }

        let messages: Vec<String> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["chunk 2", "chunk 3"]);
    }
}
