//! Line-oriented output sinks.
//!
//! Builders, hooks and deployers write the output of the tools they run into an
//! [`OutputSink`]. The dependency manager hands each dependency a buffered sink so the
//! output can be attached to the error when the dependency fails; the build
//! orchestrator prefixes lines with the image name when builds run concurrently.

use std::fmt;
use std::sync::{Arc, Mutex};

/// A cloneable destination for output lines.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<dyn Fn(&str) + Send + Sync>,
}

impl OutputSink {
    pub fn new(writer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }

    /// A sink that drops every line.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// A sink that forwards lines to the tracing subscriber at info level.
    pub fn log() -> Self {
        Self::new(|line| tracing::info!("{line}"))
    }

    /// A sink that stores lines in memory, plus a handle to read them back.
    pub fn buffered() -> (Self, OutputBuffer) {
        let buffer = OutputBuffer::default();
        let handle = buffer.clone();
        (Self::new(move |line| buffer.push(line)), handle)
    }

    /// A sink writing every line to both `self` and `other`.
    #[must_use]
    pub fn tee(&self, other: &Self) -> Self {
        let first = self.clone();
        let second = other.clone();
        Self::new(move |line| {
            first.line(line);
            second.line(line);
        })
    }

    /// A sink prepending `[prefix] ` to every line before writing to `self`.
    #[must_use]
    pub fn prefixed(&self, prefix: impl Into<String>) -> Self {
        let inner = self.clone();
        let prefix = prefix.into();
        Self::new(move |line| inner.line(&format!("[{prefix}] {line}")))
    }

    pub fn line(&self, line: &str) {
        (self.writer)(line);
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::log()
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// In-memory line buffer filled by a sink from [`OutputSink::buffered`].
#[derive(Clone, Default, Debug)]
pub struct OutputBuffer {
    contents: Arc<Mutex<String>>,
}

impl OutputBuffer {
    fn push(&self, line: &str) {
        if let Ok(mut contents) = self.contents.lock() {
            contents.push_str(line);
            contents.push('\n');
        }
    }

    /// Everything written so far, one line per entry.
    pub fn contents(&self) -> String {
        self.contents.lock().map(|contents| contents.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_sink_collects_lines() {
        let (sink, buffer) = OutputSink::buffered();
        sink.line("first");
        sink.clone().line("second");

        assert_eq!(buffer.contents(), "first\nsecond\n");
    }

    #[test]
    fn test_prefixed_and_tee() {
        let (a, buf_a) = OutputSink::buffered();
        let (b, buf_b) = OutputSink::buffered();

        let sink = a.tee(&b).prefixed("web");
        sink.line("Step 1/3");

        assert_eq!(buf_a.contents(), "[web] Step 1/3\n");
        assert_eq!(buf_b.contents(), "[web] Step 1/3\n");
    }
}
