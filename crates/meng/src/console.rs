//! Host console binding for the console stream classes.
//!
//! The engine owns one writer and one reader; the console stream runtime
//! classes route through them. Hosts install their own implementations to
//! capture or redirect program output — the default writer goes to stdout,
//! the default reader is empty (embedded programs usually have no console
//! input).

use std::io::{self, Write as _};

/// Receives text written to `ConsoleOutStream`.
pub trait ConsoleWriter {
    /// Writes a chunk of already-formatted text. No separators or newlines
    /// are added.
    fn write_text(&mut self, text: &str);

    /// Flushes buffered output to the host sink.
    fn flush(&mut self) {}
}

/// Supplies lines to `ConsoleInStream`.
pub trait ConsoleReader {
    /// Reads the next line, without its terminator. `None` at end of input.
    fn read_line(&mut self) -> Option<String>;
}

/// Default writer: buffered stdout, flushed on demand and on drop.
#[derive(Debug, Default)]
pub struct StdConsole {
    buffer: String,
}

impl ConsoleWriter for StdConsole {
    fn write_text(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let _ = io::stdout().write_all(self.buffer.as_bytes());
        let _ = io::stdout().flush();
        self.buffer.clear();
    }
}

impl Drop for StdConsole {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Writer that collects all output into a shared buffer. Useful for tests
/// and for hosts that present program output in their own UI: clone the
/// handle, give one to the engine, and read from the other.
#[derive(Debug, Default, Clone)]
pub struct CollectConsole(std::rc::Rc<std::cell::RefCell<String>>);

impl CollectConsole {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The output collected so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.0.borrow().clone()
    }
}

impl ConsoleWriter for CollectConsole {
    fn write_text(&mut self, text: &str) {
        self.0.borrow_mut().push_str(text);
    }
}

/// Reader with no input.
#[derive(Debug, Default)]
pub struct EmptyConsoleIn;

impl ConsoleReader for EmptyConsoleIn {
    fn read_line(&mut self) -> Option<String> {
        None
    }
}

/// Reader over a fixed set of lines.
#[derive(Debug)]
pub struct LinesConsoleIn {
    lines: std::vec::IntoIter<String>,
}

impl LinesConsoleIn {
    #[must_use]
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines: lines.into_iter(),
        }
    }
}

impl ConsoleReader for LinesConsoleIn {
    fn read_line(&mut self) -> Option<String> {
        self.lines.next()
    }
}
