//! Logger capability injected into lock options.

use parking_lot::Mutex;
use std::fmt::{Debug, Display, Write};

/// Structured key/value pairs attached to a log line.
pub type Fields<'a> = &'a [(&'static str, &'a dyn Display)];

/// Narrow logging sink used for lock lifecycle events.
pub trait LockLogger: Send + Sync + Debug {
    fn info(&self, message: &str, fields: Fields<'_>);
    fn warn(&self, message: &str, fields: Fields<'_>);
}

/// Renders fields as `k=v` pairs separated by spaces.
pub fn render_fields(fields: Fields<'_>) -> String {
    let mut line = String::new();
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{name}={value}");
    }
    line
}

/// Default logger, one line per event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl LockLogger for TracingLogger {
    fn info(&self, message: &str, fields: Fields<'_>) {
        tracing::info!(target: "lease_locker", fields = %render_fields(fields), "{}", message);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        tracing::warn!(target: "lease_locker", fields = %render_fields(fields), "{}", message);
    }
}

/// Severity of a captured line.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
}

/// Logger that keeps every line in memory. Test support, not a stable API.
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns captured lines as `(level, "message k=v ...")`.
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(level, _)| *level == Level::Warn)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn record(&self, level: Level, message: &str, fields: Fields<'_>) {
        let rendered = render_fields(fields);
        let line = if rendered.is_empty() {
            message.to_string()
        } else {
            format!("{message} {rendered}")
        };
        self.lines.lock().push((level, line));
    }
}

impl LockLogger for RecordingLogger {
    fn info(&self, message: &str, fields: Fields<'_>) {
        self.record(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.record(Level::Warn, message, fields);
    }
}
