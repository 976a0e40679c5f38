//! Criteria-driven, continuation-token based paged listing.
//!
//! Backends supply pages through [`PageSource`]; [`FindResults`] owns the
//! paging loop and guarantees that callers never see an empty page while
//! a continuation token is still live.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use unistore_common::{MatchCasing, PatternFormat, PatternMatcher, Result, StoragePath};

use crate::provider::Entry;

/// Which part of the tree a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NestingOption {
    CurrentFolder,
    AllFolders,
}

/// What the pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTarget {
    /// The entry name.
    Name,
    /// The root-relative path, `/`-separated.
    Path,
}

/// Immutable description of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindCriteria {
    pub nesting: NestingOption,
    pub format: PatternFormat,
    pub casing: MatchCasing,
    pub target: MatchTarget,
    pub pattern: Cow<'static, str>,
    pub page_size: usize,
}

impl FindCriteria {
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    /// Everything directly inside the folder.
    pub const ALL_IN_FOLDER: FindCriteria = FindCriteria {
        nesting: NestingOption::CurrentFolder,
        format: PatternFormat::Glob,
        casing: MatchCasing::Insensitive,
        target: MatchTarget::Name,
        pattern: Cow::Borrowed("*"),
        page_size: Self::DEFAULT_PAGE_SIZE,
    };

    /// Everything in the folder and all of its descendants.
    pub const ALL_IN_TREE: FindCriteria = FindCriteria {
        nesting: NestingOption::AllFolders,
        ..Self::ALL_IN_FOLDER
    };

    /// Glob match on names in the current folder.
    pub fn new(pattern: impl Into<Cow<'static, str>>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::ALL_IN_FOLDER
        }
    }

    pub fn with_nesting(mut self, nesting: NestingOption) -> Self {
        self.nesting = nesting;
        self
    }

    pub fn recursive(self) -> Self {
        self.with_nesting(NestingOption::AllFolders)
    }

    pub fn with_format(mut self, format: PatternFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_casing(mut self, casing: MatchCasing) -> Self {
        self.casing = casing;
        self
    }

    pub fn with_target(mut self, target: MatchTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn is_recursive(&self) -> bool {
        self.nesting == NestingOption::AllFolders
    }

    /// Compile the pattern into a reusable filter.
    pub fn filter(&self) -> Result<EntryFilter> {
        Ok(EntryFilter {
            matcher: PatternMatcher::new(&self.pattern, self.format, self.casing)?,
            target: self.target,
        })
    }
}

impl Default for FindCriteria {
    fn default() -> Self {
        Self::ALL_IN_FOLDER
    }
}

/// Compiled criteria applied to candidate entries.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    matcher: PatternMatcher,
    target: MatchTarget,
}

impl EntryFilter {
    /// Whether the entry at `path` matches.
    pub fn matches(&self, path: &StoragePath) -> bool {
        match self.target {
            MatchTarget::Name => self.matcher.is_match(path.name()),
            MatchTarget::Path => self.matcher.is_match(&path.as_string()),
        }
    }
}

/// Opaque cursor for resuming a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationToken {
    /// Index into an already materialized result list.
    Offset(usize),
    /// Server-issued marker.
    ///
    /// `folders` are folders already returned whose key prefix may still be
    /// listed on a later page.
    Marker {
        marker: String,
        folders: Vec<StoragePath>,
    },
}

/// One backend page, possibly empty even when more pages follow.
#[derive(Default)]
pub struct RawPage {
    pub entries: Vec<Entry>,
    pub next: Option<ContinuationToken>,
}

/// Backend-specific page fetching.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page at `token`, or the first page when `None`.
    async fn fetch(&self, token: Option<&ContinuationToken>) -> Result<RawPage>;
}

/// A page of find results.
///
/// The terminal page is empty and its `next` returns another terminal page,
/// so callers can loop while `entries()` is non-empty.
#[derive(Clone, Default)]
pub struct FindResults {
    entries: Vec<Entry>,
    cursor: Option<(Arc<dyn PageSource>, ContinuationToken)>,
}

impl FindResults {
    /// The terminal page.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fetch the first non-empty page from `source`.
    pub async fn start(source: Arc<dyn PageSource>) -> Result<Self> {
        Self::fetch_from(source, None).await
    }

    async fn fetch_from(
        source: Arc<dyn PageSource>,
        token: Option<ContinuationToken>,
    ) -> Result<Self> {
        let mut page = source.fetch(token.as_ref()).await?;
        let mut skipped = 0usize;

        while page.entries.is_empty() {
            let Some(next) = page.next.take() else {
                break;
            };
            skipped += 1;
            page = source.fetch(Some(&next)).await?;
        }

        if skipped > 0 {
            debug!(skipped, "Skipped empty listing pages");
        }

        Ok(Self {
            entries: page.entries,
            cursor: page.next.map(|token| (source, token)),
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a further page may hold results.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    /// The page after this one.
    pub async fn next(&self) -> Result<FindResults> {
        match &self.cursor {
            Some((source, token)) => Self::fetch_from(source.clone(), Some(token.clone())).await,
            None => Ok(Self::empty()),
        }
    }

    /// Drain this and all following pages.
    pub async fn collect_all(self) -> Result<Vec<Entry>> {
        let mut all = Vec::new();
        let mut page = self;
        while !page.is_empty() {
            let next = page.next().await?;
            all.extend(page.into_entries());
            page = next;
        }
        Ok(all)
    }
}

impl fmt::Debug for FindResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindResults")
            .field("entries", &self.entries)
            .field("cursor", &self.cursor.as_ref().map(|(_, token)| token))
            .finish()
    }
}

/// Serves an already materialized, filtered result list in fixed-size pages.
pub struct SlicePageSource {
    entries: Vec<Entry>,
    page_size: usize,
}

impl SlicePageSource {
    pub fn new(entries: Vec<Entry>, page_size: usize) -> Self {
        Self {
            entries,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl PageSource for SlicePageSource {
    async fn fetch(&self, token: Option<&ContinuationToken>) -> Result<RawPage> {
        let start = match token {
            None => 0,
            Some(ContinuationToken::Offset(offset)) => *offset,
            Some(ContinuationToken::Marker { marker, .. }) => marker.parse().map_err(|_| {
                unistore_common::Error::InvalidInput(format!("Invalid page marker: {}", marker))
            })?,
        };

        let start = start.min(self.entries.len());
        let end = (start + self.page_size).min(self.entries.len());
        let next = (end < self.entries.len()).then_some(ContinuationToken::Offset(end));

        Ok(RawPage {
            entries: self.entries[start..end].to_vec(),
            next,
        })
    }
}
