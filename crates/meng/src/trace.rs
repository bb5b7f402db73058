//! Pluggable engine tracing.
//!
//! The engine reports notable events — class loads, verbose host-exception
//! translations, unhandled-exception delivery — through a tracer owned by
//! the engine instance. There is no global logger; all diagnostic state
//! lives in the engine, and the default tracer discards everything.

use crate::except::ExceptVal;

/// Receives diagnostic events from one engine instance.
pub trait EngineTracer {
    /// A class was registered (eagerly or through the loader chain).
    fn class_registered(&mut self, class_path: &str) {
        let _ = class_path;
    }

    /// A runtime-class wrapper caught a host error and is about to re-raise
    /// it as a language exception. Only reported by wrappers that declare
    /// verbose logging.
    fn host_error(&mut self, class_path: &str, text: &str) {
        let _ = (class_path, text);
    }

    /// An exception reached the top of the frame stack uncaught.
    fn unhandled(&mut self, except: &ExceptVal) {
        let _ = except;
    }
}

/// Tracer that discards all events. The default.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl EngineTracer for NoopTracer {}

/// Tracer that writes events to stderr, one line each.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl EngineTracer for StderrTracer {
    fn class_registered(&mut self, class_path: &str) {
        eprintln!("meng: registered {class_path}");
    }

    fn host_error(&mut self, class_path: &str, text: &str) {
        eprintln!("meng: host error in {class_path}: {text}");
    }

    fn unhandled(&mut self, except: &ExceptVal) {
        eprintln!("meng: unhandled exception: {except}");
    }
}
