//! Root-relative storage paths and path-segment validation.
//!
//! Every path-accepting operation in UniStore goes through
//! [`validate_segments`]. Paths are split on both `/` and `\`, each segment is
//! trimmed, and the canonical external form always uses `/`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Canonical external separator.
pub const SEPARATOR: char = '/';

/// Characters no backend accepts inside a segment.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Split `path` into validated, trimmed segments.
///
/// Leading and trailing separators are tolerated. An interior empty segment,
/// a `.` or `..` segment, or a segment with an illegal character fails with
/// `NotWithinTree`.
pub fn validate_segments(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim().trim_matches(|c| c == '/' || c == '\\');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(|c| c == '/' || c == '\\')
        .map(|raw| {
            let segment = raw.trim();
            validate_segment(segment, path)?;
            Ok(segment.to_string())
        })
        .collect()
}

fn validate_segment(segment: &str, path: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::not_within_tree(format!(
            "Path '{}' contains an empty segment",
            path
        )));
    }
    if segment == "." || segment == ".." {
        return Err(Error::not_within_tree(format!(
            "Path '{}' contains a relative segment '{}'",
            path, segment
        )));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| c.is_control() || ILLEGAL_CHARS.contains(c))
    {
        return Err(Error::not_within_tree(format!(
            "Path '{}' contains illegal character {:?}",
            path, c
        )));
    }
    Ok(())
}

/// A validated path relative to a provider root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    segments: Vec<String>,
}

impl StoragePath {
    /// The provider root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and validate a path string.
    pub fn parse(path: &str) -> Result<Self> {
        Ok(Self {
            segments: validate_segments(path)?,
        })
    }

    /// Append a relative path (one or more segments).
    pub fn join(&self, relative: &str) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.extend(validate_segments(relative)?);
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Last segment, or an empty string for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Extension of the last segment including the dot, or an empty string.
    pub fn extension(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => "",
            Some(idx) => &name[idx..],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &StoragePath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// The part of `self` below `base`.
    pub fn strip_prefix(&self, base: &StoragePath) -> Option<StoragePath> {
        if !self.starts_with(base) {
            return None;
        }
        Some(Self {
            segments: self.segments[base.segments.len()..].to_vec(),
        })
    }

    /// Canonical `a/b/c` form, empty for the root.
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.as_string())
    }
}

impl TryFrom<String> for StoragePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.as_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use proptest::prelude::*;

    fn assert_not_within_tree(path: &str) {
        let err = validate_segments(path).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotWithinTree), "path {:?}", path);
    }

    #[test]
    fn test_root_forms() {
        assert!(validate_segments("").unwrap().is_empty());
        assert!(validate_segments("/").unwrap().is_empty());
        assert!(validate_segments("\\").unwrap().is_empty());
        assert!(StoragePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_mixed_separators_and_trimming() {
        let segments = validate_segments("/a\\ b /c.txt").unwrap();
        assert_eq!(segments, vec!["a", "b", "c.txt"]);
    }

    #[test]
    fn test_rejects_relative_and_empty_segments() {
        assert_not_within_tree("a/../b");
        assert_not_within_tree("./a");
        assert_not_within_tree("a//b");
        assert_not_within_tree("a/   /b");
        assert_not_within_tree("..");
    }

    #[test]
    fn test_rejects_illegal_characters() {
        assert_not_within_tree("a/b?c");
        assert_not_within_tree("a/b\u{0}c");
        assert_not_within_tree("x:y");
    }

    #[test]
    fn test_join_parent_name() {
        let path = StoragePath::root().join("docs").unwrap().join("2024/report.pdf").unwrap();
        assert_eq!(path.as_string(), "docs/2024/report.pdf");
        assert_eq!(path.to_string(), "/docs/2024/report.pdf");
        assert_eq!(path.name(), "report.pdf");
        assert_eq!(path.extension(), ".pdf");
        assert_eq!(path.parent().unwrap().as_string(), "docs/2024");
        assert!(StoragePath::root().parent().is_none());
    }

    #[test]
    fn test_extension_edge_cases() {
        assert_eq!(StoragePath::parse(".hidden").unwrap().extension(), "");
        assert_eq!(StoragePath::parse("noext").unwrap().extension(), "");
        assert_eq!(StoragePath::parse("a.tar.gz").unwrap().extension(), ".gz");
    }

    #[test]
    fn test_strip_prefix() {
        let base = StoragePath::parse("a/b").unwrap();
        let full = StoragePath::parse("a/b/c/d").unwrap();
        assert_eq!(full.strip_prefix(&base).unwrap().as_string(), "c/d");
        assert!(base.strip_prefix(&full).is_none());
        assert!(StoragePath::parse("a/bc").unwrap().strip_prefix(&base).is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let path = StoragePath::parse("a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: StoragePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<StoragePath>("\"a/../b\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_well_formed_paths_round_trip(
            segments in prop::collection::vec("[A-Za-z0-9_-][A-Za-z0-9_. -]{0,10}[A-Za-z0-9_-]", 1..6)
        ) {
            let joined = segments.join("/");
            let parsed = validate_segments(&joined).unwrap();
            let expected: Vec<String> = segments.iter().map(|s| s.trim().to_string()).collect();
            prop_assert_eq!(parsed, expected);
        }

        #[test]
        fn prop_dot_segments_fail(
            prefix in "[a-z]{1,5}",
            dots in prop_oneof![Just("."), Just("..")],
            suffix in "[a-z]{1,5}",
        ) {
            let path = format!("{}/{}/{}", prefix, dots, suffix);
            let err = validate_segments(&path).unwrap_err();
            prop_assert_eq!(err.code(), Some(ErrorCode::NotWithinTree));
        }
    }
}
