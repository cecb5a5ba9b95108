//! Permission patterns and wildcard matching
//!
//! A permission is a dot-separated string such as `project.create`. Granted
//! patterns may use `*` as a whole segment:
//! - `*` alone grants everything
//! - `project.*` covers `project.create` and `project.create.draft`, not `project`
//! - `project.*.read` covers `project.tasks.read`
//!
//! Matching is directional: a granted pattern is checked against a requested
//! permission, never the reverse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = '.';
const WILDCARD: &str = "*";

/// Errors that can occur while parsing a permission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Empty permission string provided
    #[error("Permission cannot be empty")]
    Empty,

    /// Permission segment is empty
    #[error("Permission segment cannot be empty in '{0}'")]
    EmptySegment(String),

    /// Wildcard mixed with other characters in a segment
    #[error("Wildcards must be standalone segments: '{0}'")]
    InvalidWildcard(String),
}

/// A granted permission pattern with wildcard support
///
/// # Examples
///
/// ```
/// use rolegate_authz::permission::PermissionPattern;
///
/// let pattern = PermissionPattern::new("project.*").unwrap();
/// assert!(pattern.matches("project.create"));
/// assert!(!pattern.matches("team.create"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionPattern {
    /// Original pattern string
    raw: String,
    /// Parsed segments
    segments: Vec<String>,
}

impl PermissionPattern {
    /// Parses and validates a granted pattern
    pub fn new(s: &str) -> Result<Self, PatternError> {
        let segments = split_segments(s)?;

        for segment in &segments {
            if segment.contains('*') && segment != WILDCARD {
                return Err(PatternError::InvalidWildcard(s.to_string()));
            }
        }

        Ok(Self {
            raw: s.to_string(),
            segments,
        })
    }

    /// Returns the raw pattern string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this pattern is the literal `*`
    pub fn grants_everything(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == WILDCARD
    }

    /// Whether this pattern contains any wildcard segment
    pub fn has_wildcards(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }

    /// Checks whether this granted pattern covers a requested permission
    ///
    /// Malformed requests never match.
    pub fn matches(&self, requested: &str) -> bool {
        match split_segments(requested) {
            Ok(requested) => self.matches_segments(&requested),
            Err(_) => false,
        }
    }

    fn matches_segments(&self, requested: &[String]) -> bool {
        let last = self.segments.len() - 1;

        for (idx, granted) in self.segments.iter().enumerate() {
            let Some(req) = requested.get(idx) else {
                // Requested permission ran out before the pattern did
                return false;
            };

            if granted == WILDCARD {
                if idx == last {
                    return true;
                }
                continue;
            }

            if granted != req {
                return false;
            }
        }

        requested.len() == self.segments.len()
    }
}

/// Checks whether `granted` covers `requested`
///
/// Both strings are validated; an invalid granted pattern never matches.
pub fn matches(granted: &str, requested: &str) -> bool {
    PermissionPattern::new(granted)
        .map(|pattern| pattern.matches(requested))
        .unwrap_or(false)
}

/// Validates a requested permission (no wildcards allowed)
pub fn validate_requested(requested: &str) -> Result<(), PatternError> {
    let segments = split_segments(requested)?;
    if segments.iter().any(|s| s.contains('*')) {
        return Err(PatternError::InvalidWildcard(requested.to_string()));
    }
    Ok(())
}

fn split_segments(s: &str) -> Result<Vec<String>, PatternError> {
    if s.is_empty() {
        return Err(PatternError::Empty);
    }

    let segments: Vec<String> = s.split(SEPARATOR).map(|s| s.to_string()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PatternError::EmptySegment(s.to_string()));
    }

    Ok(segments)
}

impl FromStr for PermissionPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PermissionPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PermissionPattern> for String {
    fn from(pattern: PermissionPattern) -> Self {
        pattern.raw
    }
}

impl fmt::Display for PermissionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
