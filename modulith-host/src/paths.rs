//! Path pattern matching shared by the hook dispatcher and the middleware
//! composer.
//!
//! Pattern language: `*` matches every path; a pattern ending in `/` matches
//! any path carrying it as a prefix; any other pattern matches the path
//! exactly or as a full segment prefix (so `/ext/files` matches
//! `/ext/files/upload` but not `/ext/filesystem`).

/// Whether `path` matches `pattern`.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('/') {
        return path == prefix || path.starts_with(pattern);
    }
    path == pattern || path.strip_prefix(pattern).is_some_and(|rest| rest.starts_with('/'))
}

/// Whether `path` matches any of `patterns`. An empty list matches all.
pub fn any_path_matches(patterns: &[String], path: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| path_matches(p, path))
}
