//! Pattern matching shared by every backend's find implementation.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a match pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternFormat {
    /// Regular expression, unanchored search.
    Regex,
    /// Shell-style glob: `*`, `?`, `[...]`, and `**` across separators.
    Glob,
    /// Whole-string comparison.
    Exact,
}

/// Case sensitivity of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchCasing {
    Sensitive,
    Insensitive,
}

impl MatchCasing {
    /// Compare two names under this casing.
    pub fn names_equal(self, a: &str, b: &str) -> bool {
        match self {
            MatchCasing::Sensitive => a == b,
            MatchCasing::Insensitive => a == b || a.to_lowercase() == b.to_lowercase(),
        }
    }
}

/// A pattern compiled once and applied to many candidates.
#[derive(Debug, Clone)]
pub enum PatternMatcher {
    Regex(Regex),
    Exact { pattern: String, casing: MatchCasing },
}

impl PatternMatcher {
    /// Compile `pattern` for the given format and casing.
    ///
    /// # Errors
    /// - `InvalidInput` if the pattern is not a valid regular expression
    pub fn new(pattern: &str, format: PatternFormat, casing: MatchCasing) -> Result<Self> {
        let source = match format {
            PatternFormat::Exact => {
                return Ok(PatternMatcher::Exact {
                    pattern: pattern.to_string(),
                    casing,
                })
            }
            PatternFormat::Regex => pattern.to_string(),
            PatternFormat::Glob => glob_to_regex(pattern),
        };

        RegexBuilder::new(&source)
            .case_insensitive(casing == MatchCasing::Insensitive)
            .build()
            .map(PatternMatcher::Regex)
            .map_err(|e| Error::InvalidInput(format!("Invalid pattern '{}': {}", pattern, e)))
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            PatternMatcher::Regex(regex) => regex.is_match(candidate),
            PatternMatcher::Exact { pattern, casing } => casing.names_equal(pattern, candidate),
        }
    }
}

/// One-shot match of `candidate` against `pattern`.
pub fn is_match(
    pattern: &str,
    format: PatternFormat,
    casing: MatchCasing,
    candidate: &str,
) -> Result<bool> {
    Ok(PatternMatcher::new(pattern, format, casing)?.is_match(candidate))
}

/// Translate a glob into an anchored regular expression.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    // `**/` also matches zero directories
                    out.push_str("(?:.*/)?");
                    i += 2;
                } else {
                    out.push_str(".*");
                    i += 1;
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    out.push('[');
                    match class.strip_prefix('!') {
                        Some(rest) => {
                            out.push('^');
                            out.push_str(&rest.replace('\\', "\\\\"));
                        }
                        None => out.push_str(&class.replace('\\', "\\\\")),
                    }
                    out.push(']');
                    i += len + 1;
                }
                _ => out.push_str("\\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}
