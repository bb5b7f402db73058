//! Error and parse-event handlers.
//!
//! The host installs handlers on the engine: one for unhandled run-time
//! exceptions (both language-level and host-thrown), one for parse-time
//! events from the external compiler. The stream handler here renders the
//! same report the original tooling produced: a header, the class path,
//! error name, text, and line, then a stack dump walked one frame at a time.

use std::io::Write;

use strum::Display;

use crate::{engine::MacroEngine, except::ExceptVal};

/// Severity of a parse-time event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ParseEventSev {
    Info,
    Warning,
    Error,
}

/// One parse-time event from the external compiler.
#[derive(Debug, Clone)]
pub struct ParseEvent {
    pub sev: ParseEventSev,
    pub class_path: String,
    pub line: u32,
    pub col: u32,
    pub text: String,
}

/// Receives parse-time events.
pub trait ParseErrHandler {
    fn parse_event(&mut self, event: &ParseEvent);
}

/// Receives unhandled run-time failures.
///
/// `macro_exception` delivers a language exception that no Try caught;
/// `engine_fault` delivers internal faults (malformed opcode streams, host
/// panics translated at the wrapper boundary). Both are called with the
/// frame stack still intact so the handler can walk it.
pub trait ErrHandler {
    fn macro_exception(&mut self, except: &ExceptVal, engine: &MacroEngine);
    fn engine_fault(&mut self, text: &str, engine: &MacroEngine);
}

/// Handler that writes reports to any `Write` sink.
pub struct StreamErrHandler<W: Write> {
    sink: W,
}

impl<W: Write> StreamErrHandler<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn dump_frames(&mut self, engine: &MacroEngine) {
        let _ = writeln!(self.sink, "\nStack dump:\n----------------------");
        let mut cursor = engine.top_frame_cursor();
        while let Some(line) = engine.format_next_call_frame(&mut cursor) {
            let _ = writeln!(self.sink, "{line}");
        }
        let _ = writeln!(self.sink);
        let _ = self.sink.flush();
    }
}

impl<W: Write> ErrHandler for StreamErrHandler<W> {
    fn macro_exception(&mut self, except: &ExceptVal, engine: &MacroEngine) {
        let _ = writeln!(
            self.sink,
            "A macro exception occurred:\n  CLASS: {}\n   LINE: {}\n  ERROR: {}\n   TEXT: {}",
            except.src_class_path, except.line, except.err_name, except.err_text
        );
        self.dump_frames(engine);
    }

    fn engine_fault(&mut self, text: &str, engine: &MacroEngine) {
        let _ = writeln!(self.sink, "An engine fault occurred:\n  {text}");
        self.dump_frames(engine);
    }
}

/// Parse handler that writes one line per event to any `Write` sink.
pub struct StreamParseErrHandler<W: Write> {
    sink: W,
}

impl<W: Write> StreamParseErrHandler<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> ParseErrHandler for StreamParseErrHandler<W> {
    fn parse_event(&mut self, event: &ParseEvent) {
        let _ = writeln!(
            self.sink,
            "{} [{} {}.{}]: {}",
            event.sev, event.class_path, event.line, event.col, event.text
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_events_render_one_line() {
        let mut handler = StreamParseErrHandler::new(Vec::new());
        handler.parse_event(&ParseEvent {
            sev: ParseEventSev::Warning,
            class_path: "MEng.User.Test".into(),
            line: 4,
            col: 9,
            text: "unused local".into(),
        });
        let out = String::from_utf8(handler.into_inner()).unwrap();
        assert_eq!(out, "Warning [MEng.User.Test 4.9]: unused local\n");
    }
}
