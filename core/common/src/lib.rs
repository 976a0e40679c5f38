//! Common utilities and types shared across UniStore modules.
//!
//! This crate holds the pieces every storage backend must agree on:
//! the error type with its closed set of provider error codes, the
//! root-relative path type with its segment validation gate, and the
//! pattern matching used by every find implementation.

pub mod error;
pub mod path;
pub mod pattern;

pub use error::{BoxError, Error, ErrorCode, Result};
pub use path::{validate_segments, StoragePath, SEPARATOR};
pub use pattern::{is_match, MatchCasing, PatternFormat, PatternMatcher};
