//! The sandbox path resolver.
//!
//! Programs see an absolute path space rooted inside the sandbox; the host
//! sees real filesystem paths. Every runtime class that touches the
//! filesystem routes through the engine's resolver to translate between the
//! two. The default resolver pins the program space under one fixed base
//! path and refuses any path that normalizes to escape it.

use std::fmt;

/// Why a path translation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// Expansion produced a path outside the base (a `..` escape) or the
    /// program path was not absolute within the sandbox.
    BadExpPath,
    /// The host path does not start with the base, so it has no
    /// program-visible form.
    CantConvertPath,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadExpPath => f.write_str("path expands outside the sandbox base"),
            Self::CantConvertPath => f.write_str("host path is not under the sandbox base"),
        }
    }
}

/// Translates between program-visible and host file paths.
pub trait FileResolver {
    /// Expands a program path (absolute within the sandbox, `/`-separated)
    /// to a host path.
    fn expand_path(&self, program_path: &str) -> Result<String, ResolveError>;

    /// Contracts a host path back to its program-visible form.
    fn contract_path(&self, host_path: &str) -> Result<String, ResolveError>;
}

/// Resolver that maps the program space onto one fixed host base path.
#[derive(Debug, Clone)]
pub struct FixedBaseResolver {
    base: String,
}

impl FixedBaseResolver {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.len() > 1 && base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base
    }
}

impl FileResolver for FixedBaseResolver {
    fn expand_path(&self, program_path: &str) -> Result<String, ResolveError> {
        // Program paths are absolute within the sandbox.
        if !program_path.starts_with('/') {
            return Err(ResolveError::BadExpPath);
        }
        let joined = format!("{}{program_path}", self.base);
        let normalized = normalize_path(&joined).ok_or(ResolveError::BadExpPath)?;
        if !starts_with_ci(&normalized, &self.base) {
            return Err(ResolveError::BadExpPath);
        }
        Ok(normalized)
    }

    fn contract_path(&self, host_path: &str) -> Result<String, ResolveError> {
        if !starts_with_ci(host_path, &self.base) {
            return Err(ResolveError::CantConvertPath);
        }
        let rest = &host_path[self.base.len()..];
        if rest.is_empty() {
            return Ok("/".to_owned());
        }
        if !rest.starts_with('/') {
            // The base matched mid-component, e.g. base /app against /appdata.
            return Err(ResolveError::CantConvertPath);
        }
        Ok(rest.to_owned())
    }
}

/// Collapses `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb above the root.
fn normalize_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(path.len());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    Some(out)
}

/// ASCII case-insensitive prefix test, matching the original resolver's
/// case-blind base comparison.
fn starts_with_ci(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> FixedBaseResolver {
        FixedBaseResolver::new("/app/data")
    }

    #[test]
    fn expand_joins_under_base() {
        assert_eq!(resolver().expand_path("/cfg/a.txt").unwrap(), "/app/data/cfg/a.txt");
    }

    #[test]
    fn expand_rejects_escapes() {
        assert_eq!(
            resolver().expand_path("/../../etc/passwd"),
            Err(ResolveError::BadExpPath)
        );
        assert_eq!(resolver().expand_path("/a/../../x"), Err(ResolveError::BadExpPath));
        // Dotted traversal that stays inside the base is fine.
        assert_eq!(resolver().expand_path("/a/../b.txt").unwrap(), "/app/data/b.txt");
    }

    #[test]
    fn expand_requires_leading_slash() {
        assert_eq!(resolver().expand_path("cfg/a.txt"), Err(ResolveError::BadExpPath));
    }

    #[test]
    fn contract_strips_base_case_insensitively() {
        assert_eq!(resolver().contract_path("/App/Data/cfg/a.txt").unwrap(), "/cfg/a.txt");
        assert_eq!(resolver().contract_path("/app/data").unwrap(), "/");
    }

    #[test]
    fn contract_rejects_foreign_paths() {
        assert_eq!(resolver().contract_path("/other/x"), Err(ResolveError::CantConvertPath));
        assert_eq!(resolver().contract_path("/app/database/x"), Err(ResolveError::CantConvertPath));
    }

    #[test]
    fn round_trip_for_legal_paths() {
        let r = resolver();
        for p in ["/a.txt", "/cfg/deep/file.bin", "/"] {
            let expanded = r.expand_path(p).unwrap();
            assert_eq!(r.contract_path(&expanded).unwrap(), p);
        }
    }
}
