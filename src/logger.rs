//! Per-plugin diagnostic log sink.
//!
//! Each plugin gets its own fixed-capacity ring buffer of structured entries.
//! The dispatch core writes lifecycle and dispatch failures here; plugin code
//! writes through the facade's log methods. Oldest entries are silently
//! evicted once the buffer is full, and `error_count` reflects only entries
//! still resident.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Default entry capacity for a plugin's log buffer.
pub const PLUGIN_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single entry in a plugin's log buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginLogEntry {
    pub timestamp_ms: i64,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Fixed-capacity ring buffer of log entries for one plugin.
#[derive(Debug)]
pub struct PluginLogger {
    entries: Mutex<VecDeque<PluginLogEntry>>,
    capacity: usize,
}

impl PluginLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(PLUGIN_LOG_CAPACITY)
    }

    /// Append an entry, evicting the oldest when full.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let entry = PluginLogEntry {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            message: message.into(),
            data,
        };
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    /// All resident entries in chronological order (oldest first).
    pub fn entries(&self) -> Vec<PluginLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of error-level entries currently resident. Evicted errors are
    /// not counted.
    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
