//! Local filesystem storage provider.
//!
//! Folders and files map directly onto directories and files below a root
//! directory. Streams are native tokio file handles; nothing is staged.

mod file;
mod folder;
pub mod watch;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use unistore_common::{Error, MatchCasing, Result, StoragePath};

use crate::provider::{FolderEntry, StorageProvider};

pub use file::LocalFileEntry;
pub use folder::LocalFolderEntry;
pub use watch::{CallbackRegistration, ChangeToken};

/// State shared by a provider and every entry it hands out.
#[derive(Debug)]
pub(crate) struct LocalContext {
    root: PathBuf,
    casing: MatchCasing,
}

/// A path resolved against the disk.
pub(crate) struct Resolved {
    pub path: StoragePath,
    pub fs_path: PathBuf,
    pub metadata: std::fs::Metadata,
}

impl LocalContext {
    /// Convert a StoragePath to a filesystem path.
    pub(crate) fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for segment in path.segments() {
            fs_path.push(segment);
        }
        fs_path
    }

    /// Find what is on disk at `path`, honoring the provider casing.
    pub(crate) async fn resolve(&self, path: &StoragePath) -> Result<Option<Resolved>> {
        let exact = self.to_fs_path(path);
        match fs::metadata(&exact).await {
            Ok(metadata) => {
                return Ok(Some(Resolved {
                    path: path.clone(),
                    fs_path: exact,
                    metadata,
                }))
            }
            Err(e) if is_missing(&e) => {}
            Err(e) => return Err(e.into()),
        }

        if self.casing == MatchCasing::Sensitive {
            return Ok(None);
        }

        let mut current = self.root.clone();
        let mut actual = StoragePath::root();
        for segment in path.segments() {
            let name = if fs::try_exists(current.join(segment)).await? {
                segment.clone()
            } else {
                match find_name_ignoring_case(&current, segment).await? {
                    Some(name) => name,
                    None => return Ok(None),
                }
            };
            current.push(&name);
            actual = actual.join(&name)?;
        }

        match fs::metadata(&current).await {
            Ok(metadata) => Ok(Some(Resolved {
                path: actual,
                fs_path: current,
                metadata,
            })),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Where a new entry at `path` belongs on disk.
    ///
    /// On a case-insensitive provider existing ancestors keep their on-disk
    /// names; only the missing trailing segments use the given casing.
    pub(crate) async fn placement(&self, path: &StoragePath) -> Result<(StoragePath, PathBuf)> {
        if self.casing == MatchCasing::Sensitive {
            return Ok((path.clone(), self.to_fs_path(path)));
        }

        let mut current = self.root.clone();
        let mut actual = StoragePath::root();
        let mut existing = true;
        for segment in path.segments() {
            let name = if !existing || fs::try_exists(current.join(segment)).await? {
                segment.clone()
            } else {
                match find_name_ignoring_case(&current, segment).await? {
                    Some(name) => name,
                    None => {
                        existing = false;
                        segment.clone()
                    }
                }
            };
            current.push(&name);
            actual = actual.join(&name)?;
        }
        Ok((actual, current))
    }
}

async fn find_name_ignoring_case(dir: &Path, wanted: &str) -> Result<Option<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if is_missing(&e) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if MatchCasing::Insensitive.names_equal(name, wanted) {
                return Ok(Some(name.to_string()));
            }
        }
    }
    Ok(None)
}

/// Whether an I/O error means "nothing there".
pub(crate) fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Modification time of a filesystem object.
pub(crate) async fn modified_at(fs_path: &Path, path: &StoragePath) -> Result<DateTime<Utc>> {
    match fs::metadata(fs_path).await {
        Ok(metadata) => Ok(metadata.modified()?.into()),
        Err(e) if is_missing(&e) => Err(Error::does_not_exist(path)),
        Err(e) => Err(e.into()),
    }
}

/// Local filesystem storage provider.
///
/// Stores entries in a local directory structure.
#[derive(Debug, Clone)]
pub struct LocalStorageProvider {
    ctx: Arc<LocalContext>,
}

impl LocalStorageProvider {
    /// Create a case-sensitive provider rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_casing(root, MatchCasing::Sensitive)
    }

    /// Create a provider with an explicit name casing.
    pub fn with_casing(root: impl AsRef<Path>, casing: MatchCasing) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self::from_context(LocalContext { root, casing }))
    }

    fn from_context(ctx: LocalContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub(crate) fn from_shared(ctx: Arc<LocalContext>) -> Self {
        Self { ctx }
    }

    pub fn root(&self) -> &Path {
        &self.ctx.root
    }

    /// Watch the whole provider tree for changes.
    pub fn watch(&self) -> Result<ChangeToken> {
        ChangeToken::watch(&self.ctx.root)
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn match_casing(&self) -> MatchCasing {
        self.ctx.casing
    }

    async fn open_root_folder(&self) -> Result<Arc<dyn FolderEntry>> {
        Ok(Arc::new(LocalFolderEntry::new(
            self.ctx.clone(),
            StoragePath::root(),
            self.ctx.root.clone(),
        )))
    }
}
