// Logs module - Line-oriented destinations for child output

mod writer;

pub use writer::{FileSink, DEFAULT_MAX_AGE, DEFAULT_MAX_BACKUPS, DEFAULT_MAX_LOG_SIZE};

use std::io::Write;
use std::sync::{Arc, Mutex};

/// A destination for complete lines of text
///
/// Lines arrive without their terminator. Sinks never fail upward; a sink that
/// cannot write reports through `tracing` and drops the line.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn LineSink>;

/// Silently drops every line
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl LineSink for Discard {
    fn write_line(&self, _line: &str) {}
}

/// Writes lines to this process's stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    }
}

/// Writes lines to this process's stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LineSink for StderrSink {
    fn write_line(&self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
    }
}

/// Collects lines in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buffer: Arc<Mutex<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, one `\n`-terminated line per write
    pub fn contents(&self) -> String {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, line: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
}

/// A discarding sink, the default for every supervisor stream
pub fn discard() -> SharedSink {
    Arc::new(Discard)
}
