use chrono::{DateTime, Utc};
use serde::Serialize;

pub const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of the user-facing activity log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Appends an entry, dropping the oldest ones past `LOG_CAPACITY`.
pub fn push_entry(log: &mut Vec<LogEntry>, at: DateTime<Utc>, level: LogLevel, message: String) {
    log.push(LogEntry {
        timestamp: at,
        level,
        message,
    });
    if log.len() > LOG_CAPACITY {
        let excess = log.len() - LOG_CAPACITY;
        log.drain(0..excess);
    }
}
