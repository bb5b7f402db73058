//! Language-level exceptions.
//!
//! Every failure a program can observe — arithmetic, type, collection, I/O,
//! or user-thrown — is one exception value: the id of the enum class that
//! keys the error, the ordinal within it, and the text captured at the throw
//! site. The engine reserves a single in-flight slot for it; `Throw` fills
//! the slot and unwinds, a catching `Try` copies it out and clears it.
//!
//! Inside the interpreter, an in-flight exception travels as the `Err` arm of
//! [`RunResult`], so the dispatch loop stays branchless on the happy path.

use std::fmt;

use crate::id::{ClassId, EnumOrdinal};

/// Result alias for operations that can raise a language exception or hit an
/// internal fault.
pub type RunResult<T> = Result<T, RunError>;

/// The error channel of the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// A language exception is in flight; the value is in the engine's
    /// exception slot. Unwinding proceeds until a Try frame catches it or it
    /// reaches the unhandled-exception handler.
    Thrown,
    /// Internal engine fault: malformed opcode stream, bad id, broken stack
    /// invariant. Never visible to the program; aborts the invocation.
    Internal(String),
}

impl RunError {
    /// Creates an internal fault with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thrown => f.write_str("language exception in flight"),
            Self::Internal(msg) => write!(f, "internal fault: {msg}"),
        }
    }
}

/// The one exception value of an engine instance.
///
/// Carries everything diagnostics need: the class path of the throw site, the
/// enum class and ordinal that key the error, the item's name, the formatted
/// text, and the source line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptVal {
    /// Class path of the class whose method threw.
    pub src_class_path: String,
    /// Id of the enum class that keys this error.
    pub err_class: Option<ClassId>,
    /// Ordinal of the error item within its enum class.
    pub ordinal: EnumOrdinal,
    /// Name of the error item, e.g. `OpenFailed`.
    pub err_name: String,
    /// Formatted error text.
    pub err_text: String,
    /// One-based source line of the throw site, zero if unknown.
    pub line: u32,
}

impl ExceptVal {
    /// Returns true when this exception matches the given enum class and
    /// ordinal pair. This backs the language's `Exception.Check()` method.
    #[must_use]
    pub fn matches(&self, err_class: ClassId, ordinal: EnumOrdinal) -> bool {
        self.err_class == Some(err_class) && self.ordinal == ordinal
    }

    /// Returns true when this exception is keyed by the given enum class with
    /// an ordinal strictly greater than `ordinal`. Backs `CheckGreater()`.
    #[must_use]
    pub fn matches_greater(&self, err_class: ClassId, ordinal: EnumOrdinal) -> bool {
        self.err_class == Some(err_class) && self.ordinal > ordinal
    }

    /// Clears the value back to its default state. Called on Try entry and
    /// after a catch copies the value out.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for ExceptVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, line {}): {}",
            self.err_name, self.src_class_path, self.line, self.err_text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExceptVal {
        ExceptVal {
            src_class_path: "MEng.User.Test".into(),
            err_class: Some(ClassId::from_index(9)),
            ordinal: 2,
            err_name: "BadThing".into(),
            err_text: "Bad thing happened".into(),
            line: 12,
        }
    }

    #[test]
    fn check_matches_exact_pair() {
        let ev = sample();
        assert!(ev.matches(ClassId::from_index(9), 2));
        assert!(!ev.matches(ClassId::from_index(9), 3));
        assert!(!ev.matches(ClassId::from_index(8), 2));
    }

    #[test]
    fn check_greater_is_strict() {
        let ev = sample();
        assert!(ev.matches_greater(ClassId::from_index(9), 1));
        assert!(!ev.matches_greater(ClassId::from_index(9), 2));
    }

    #[test]
    fn reset_clears_everything() {
        let mut ev = sample();
        ev.reset();
        assert_eq!(ev, ExceptVal::default());
    }
}
