use chrono::{DateTime, Local};
use std::fmt;

/// Append-only display log of the monitor.
pub trait LogSink {
    fn append(&mut self, entry: LogEntry);
    fn clear(&mut self);
    fn entries(&self) -> &[LogEntry];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Connection lifecycle: connecting, connected, subscribed, closed
    Lifecycle,
    Message,
    /// A message whose payload is not valid JSON
    MalformedPayload,
    Alert,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub kind: EntryKind,
    pub text: String,
}

impl LogEntry {
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            text: text.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{} {}", self.timestamp.format("%H:%M:%S"), self)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            EntryKind::MalformedPayload => write!(f, "{} [malformed payload]", self.text),
            _ => write!(f, "{}", self.text),
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LogSink for MessageLog {
    fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}
