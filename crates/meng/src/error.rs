//! Registration and embedding-level errors.
//!
//! These are ordinary Rust errors returned from the host-facing API. They are
//! distinct from language-level exceptions (see [`crate::except`]), which are
//! values raised and caught by the running program. Load-time failures are
//! always fatal to the load: a program that trips one is malformed.

use std::fmt;

/// Result alias for class registration operations.
pub type RegResult<T> = Result<T, RegError>;

/// Errors raised while registering classes and building descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegError {
    /// The 16-bit class id space is exhausted. Hard initialization failure.
    IdOverflow,
    /// A class with this fully-qualified path is already registered.
    DuplicatePath(String),
    /// The named parent class path does not resolve to a registered class.
    UnknownParent(String),
    /// No registered class or loader knows this path.
    ClassNotFound(String),
    /// The class path is not a legal dotted name rooted at `MEng`.
    BadClassPath(String),
    /// An attempt to add methods, literals, or members after sealing.
    ClassSealed(String),
    /// A method name was added twice to the same class.
    DuplicateMethod { class: String, method: String },
}

impl fmt::Display for RegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdOverflow => f.write_str("class id space exhausted"),
            Self::DuplicatePath(path) => write!(f, "class path '{path}' is already registered"),
            Self::UnknownParent(path) => write!(f, "parent class '{path}' is not registered"),
            Self::ClassNotFound(path) => write!(f, "class '{path}' was not found"),
            Self::BadClassPath(path) => write!(f, "'{path}' is not a legal class path"),
            Self::ClassSealed(path) => write!(f, "class '{path}' is sealed"),
            Self::DuplicateMethod { class, method } => {
                write!(f, "method '{method}' already exists on class '{class}'")
            }
        }
    }
}

impl std::error::Error for RegError {}

/// Errors returned from the host-facing `invoke` entry point.
///
/// An unhandled language exception is not in this enum: `invoke` reports it
/// through its return value after delivering it to the installed error
/// handler, so the host sees a flag rather than an error type.
#[derive(Debug)]
pub enum InvokeError {
    /// The target class or entry method does not exist.
    Reg(RegError),
    /// The named entry method was not found on the target class.
    NoSuchMethod { class: String, method: String },
    /// The supplied parameter list does not match the entry signature.
    BadParmCount { expected: usize, got: usize },
    /// The engine hit an internal fault (malformed opcode stream, bad id).
    /// This indicates a compiler or embedding bug, not a program error.
    Internal(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(err) => err.fmt(f),
            Self::NoSuchMethod { class, method } => {
                write!(f, "class '{class}' has no method '{method}'")
            }
            Self::BadParmCount { expected, got } => {
                write!(f, "entry method takes {expected} parameters, got {got}")
            }
            Self::Internal(msg) => write!(f, "internal engine fault: {msg}"),
        }
    }
}

impl std::error::Error for InvokeError {}

impl From<RegError> for InvokeError {
    fn from(err: RegError) -> Self {
        Self::Reg(err)
    }
}

/// Validates a program-facing class path.
///
/// Paths are case-sensitive dotted names whose first component is always
/// `MEng`. Components are non-empty runs of alphanumerics, underscore, and
/// hyphen.
#[must_use]
pub fn is_valid_class_path(path: &str) -> bool {
    let mut parts = path.split('.');
    if parts.next() != Some("MEng") {
        return false;
    }
    parts.all(|part| {
        !part.is_empty() && part.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    })
}

/// Returns the short (final-component) name of a class path.
#[must_use]
pub fn short_name_of(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(is_valid_class_path("MEng.Object"));
        assert!(is_valid_class_path("MEng.System.Runtime.FileSys"));
        assert!(is_valid_class_path("MEng.User.My-Class_2"));
        assert!(!is_valid_class_path("Meng.Object"));
        assert!(!is_valid_class_path("MEng..Object"));
        assert!(!is_valid_class_path("System.Runtime"));
        assert!(!is_valid_class_path("MEng.Bad Name"));
    }

    #[test]
    fn short_names() {
        assert_eq!(short_name_of("MEng.System.Runtime.FileSys"), "FileSys");
        assert_eq!(short_name_of("MEng.Object"), "Object");
    }
}
