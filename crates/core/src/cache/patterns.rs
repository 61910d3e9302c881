//! Pure pattern matching functions for cache keys.
//!
//! Patterns support `*` as a wildcard that matches any sequence of
//! characters. A pattern expression joins several patterns with
//! [`PATTERN_DELIMITER`] so a single invalidation call can drop more than
//! one key family.

use thiserror::Error;

/// Separator between patterns in a pattern expression.
pub const PATTERN_DELIMITER: char = '|';

const WILDCARD: char = '*';

/// A malformed invalidation pattern.
///
/// This is the only cache error that is ever surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid cache pattern {pattern:?}: {reason}")]
pub struct InvalidPatternError {
    pub pattern: String,
    pub reason: &'static str,
}

impl InvalidPatternError {
    fn new(pattern: &str, reason: &'static str) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason,
        }
    }
}

/// A single key family to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// No wildcard: exactly one key.
    Exact(String),
    /// A single trailing wildcard. Holds the prefix without the `*`.
    Prefix(String),
    /// Wildcards anywhere else.
    Glob(String),
}

impl Pattern {
    /// Parses and validates a single pattern.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPatternError`] for empty patterns, patterns with
    /// surrounding whitespace, and patterns made only of wildcards.
    pub fn parse(raw: &str) -> Result<Self, InvalidPatternError> {
        if raw.is_empty() {
            return Err(InvalidPatternError::new(raw, "pattern is empty"));
        }
        if raw.trim() != raw {
            return Err(InvalidPatternError::new(
                raw,
                "pattern has leading or trailing whitespace",
            ));
        }
        if raw.chars().all(|c| c == WILDCARD) {
            return Err(InvalidPatternError::new(
                raw,
                "pattern must name a key family, not every key",
            ));
        }

        let Some(first_wildcard) = raw.find(WILDCARD) else {
            return Ok(Self::Exact(raw.to_string()));
        };

        if first_wildcard == raw.len() - 1 {
            Ok(Self::Prefix(raw[..first_wildcard].to_string()))
        } else {
            Ok(Self::Glob(raw.to_string()))
        }
    }

    /// Returns true if the key belongs to this family.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Glob(glob) => pattern_matches(glob, key),
        }
    }

    /// Returns the pattern in its textual form.
    pub fn as_glob(&self) -> String {
        match self {
            Self::Exact(exact) => exact.clone(),
            Self::Prefix(prefix) => format!("{prefix}{WILDCARD}"),
            Self::Glob(glob) => glob.clone(),
        }
    }

    /// Returns the `MATCH` argument for a Redis `SCAN`.
    ///
    /// Redis globs also treat `?`, `[`, `]` and `\` as special; they are
    /// escaped so only `*` keeps its wildcard meaning.
    pub fn scan_match(&self) -> String {
        escape_redis_glob(&self.as_glob())
    }
}

/// Parses a pattern expression into its individual patterns.
///
/// Duplicate patterns are collapsed; order is preserved.
///
/// # Examples
///
/// ```
/// use dinecache_core::cache::{parse_pattern_expr, Pattern};
///
/// let patterns = parse_pattern_expr("orders:restaurant:A:*|menu:restaurant:A").unwrap();
/// assert_eq!(
///     patterns,
///     vec![
///         Pattern::Prefix("orders:restaurant:A:".to_string()),
///         Pattern::Exact("menu:restaurant:A".to_string()),
///     ]
/// );
///
/// assert!(parse_pattern_expr("").is_err());
/// ```
pub fn parse_pattern_expr(expr: &str) -> Result<Vec<Pattern>, InvalidPatternError> {
    if expr.trim().is_empty() {
        return Err(InvalidPatternError::new(expr, "pattern expression is empty"));
    }

    let mut patterns: Vec<Pattern> = Vec::new();
    for raw in expr.split(PATTERN_DELIMITER) {
        let pattern = Pattern::parse(raw)?;
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    Ok(patterns)
}

fn escape_redis_glob(glob: &str) -> String {
    let mut escaped = String::with_capacity(glob.len());
    for c in glob.chars() {
        if matches!(c, '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Checks if a cache key matches a glob pattern.
///
/// The pattern supports `*` as a wildcard that matches any sequence
/// of characters (including empty strings).
///
/// # Examples
///
/// ```
/// use dinecache_core::cache::pattern_matches;
///
/// // Exact match
/// assert!(pattern_matches("menu:restaurant:R1", "menu:restaurant:R1"));
///
/// // Wildcard at end
/// assert!(pattern_matches("orders:restaurant:R1:*", "orders:restaurant:R1:list:3fa2b1c0"));
///
/// // Wildcard in middle
/// assert!(pattern_matches("orders:restaurant:*:stats", "orders:restaurant:R2:stats"));
///
/// // No match
/// assert!(!pattern_matches("orders:restaurant:R1:*", "inventory:restaurant:R1:all"));
/// ```
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern.is_empty() {
        return key.is_empty();
    }

    if pattern == "*" {
        return true;
    }

    let segments: Vec<&str> = pattern.split(WILDCARD).collect();

    // No wildcards: exact match
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut remaining = key;
    let starts_with_wildcard = pattern.starts_with(WILDCARD);
    let ends_with_wildcard = pattern.ends_with(WILDCARD);

    for (i, segment) in segments.iter().enumerate() {
        // Adjacent or leading/trailing wildcards produce empty segments
        if segment.is_empty() {
            continue;
        }

        let is_first = i == 0;
        let is_last = i == segments.len() - 1;

        if is_first && !starts_with_wildcard {
            if !remaining.starts_with(segment) {
                return false;
            }
            remaining = &remaining[segment.len()..];
        } else if is_last && !ends_with_wildcard {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(pos) => {
                    remaining = &remaining[pos + segment.len()..];
                }
                None => return false,
            }
        }
    }

    true
}
