use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use unistore_common::{Error, ErrorCode, Result, StoragePath};

use super::{is_missing, modified_at, ChangeToken, LocalContext, LocalFileEntry, LocalStorageProvider};
use crate::find::{EntryFilter, FindCriteria, FindResults, SlicePageSource};
use crate::provider::{Entry, EntryInfo, FileEntry, FolderEntry, ReadStream, StorageProvider};
use crate::settings::CreateFileArgs;

/// A directory below the provider root.
#[derive(Debug, Clone)]
pub struct LocalFolderEntry {
    ctx: Arc<LocalContext>,
    path: StoragePath,
    fs_path: PathBuf,
}

impl LocalFolderEntry {
    pub(crate) fn new(ctx: Arc<LocalContext>, path: StoragePath, fs_path: PathBuf) -> Self {
        Self { ctx, path, fs_path }
    }

    /// Watch this folder and everything below it for changes.
    pub fn watch(&self) -> Result<ChangeToken> {
        ChangeToken::watch(&self.fs_path)
    }

    fn to_entry(&self, path: StoragePath, fs_path: PathBuf, is_dir: bool) -> Entry {
        if is_dir {
            Entry::Folder(Arc::new(LocalFolderEntry::new(self.ctx.clone(), path, fs_path)))
        } else {
            Entry::File(Arc::new(LocalFileEntry::new(self.ctx.clone(), path, fs_path)))
        }
    }
}

#[async_trait]
impl EntryInfo for LocalFolderEntry {
    fn path(&self) -> &StoragePath {
        &self.path
    }

    async fn last_modified(&self) -> Result<DateTime<Utc>> {
        modified_at(&self.fs_path, &self.path).await
    }

    fn provider(&self) -> Arc<dyn StorageProvider> {
        Arc::new(LocalStorageProvider::from_shared(self.ctx.clone()))
    }
}

#[async_trait]
impl FolderEntry for LocalFolderEntry {
    #[instrument(skip(self, args), fields(folder = %self.path))]
    async fn create_file(&self, path: &str, args: CreateFileArgs) -> Result<Arc<dyn FileEntry>> {
        let target = self.path.join(path)?;
        if target == self.path {
            return Err(Error::not_within_tree("File path is empty"));
        }

        if self.ctx.resolve(&target).await?.is_some() {
            return Err(Error::provider(
                ErrorCode::CannotCreateFileWhenItAlreadyExists,
                format!("File already exists: {}", target),
            ));
        }

        let (target, fs_path) = self.ctx.placement(&target).await?;
        match write_new_file(&fs_path, args.content).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::provider_with_source(
                    ErrorCode::CannotCreateFileWhenItAlreadyExists,
                    format!("File already exists: {}", target),
                    e,
                ));
            }
            Err(e) => {
                return Err(Error::provider_with_source(
                    ErrorCode::CannotCreateFile,
                    format!("Failed to create file: {}", target),
                    e,
                ));
            }
        }

        info!(path = %target, "Created file");
        Ok(Arc::new(LocalFileEntry::new(self.ctx.clone(), target, fs_path)))
    }

    async fn create_folder(&self, path: &str) -> Result<Arc<dyn FolderEntry>> {
        let target = self.path.join(path)?;
        if let Some(existing) = self.ctx.resolve(&target).await? {
            if existing.metadata.is_dir() {
                return Ok(Arc::new(LocalFolderEntry::new(
                    self.ctx.clone(),
                    existing.path,
                    existing.fs_path,
                )));
            }
            return Err(Error::InvalidInput(format!(
                "A file exists at folder path: {}",
                target
            )));
        }

        let (target, fs_path) = self.ctx.placement(&target).await?;
        fs::create_dir_all(&fs_path).await?;
        debug!(path = %target, "Created folder");
        Ok(Arc::new(LocalFolderEntry::new(self.ctx.clone(), target, fs_path)))
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.path.join(path)?;
        if target == self.path {
            return self.delete_self().await;
        }

        let Some(found) = self.ctx.resolve(&target).await? else {
            return Err(Error::does_not_exist(&target));
        };

        let result = if found.metadata.is_dir() {
            fs::remove_dir_all(&found.fs_path).await
        } else {
            fs::remove_file(&found.fs_path).await
        };
        match result {
            Ok(()) => {
                info!(path = %found.path, "Deleted entry");
                Ok(())
            }
            Err(e) if is_missing(&e) => Err(Error::does_not_exist(&target)),
            Err(e) => Err(e.into()),
        }
    }

    async fn open(&self, path: &str) -> Result<Option<Entry>> {
        let target = self.path.join(path)?;
        if target == self.path {
            return Ok(Some(Entry::Folder(Arc::new(self.clone()))));
        }

        Ok(self.ctx.resolve(&target).await?.map(|found| {
            let is_dir = found.metadata.is_dir();
            self.to_entry(found.path, found.fs_path, is_dir)
        }))
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn find(&self, criteria: &FindCriteria) -> Result<FindResults> {
        let filter = criteria.filter()?;
        let recursive = criteria.is_recursive();
        let base = self.clone();

        let entries = tokio::task::spawn_blocking(move || base.enumerate(&filter, recursive))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?;

        debug!(count = entries.len(), recursive, "Enumerated folder");
        FindResults::start(Arc::new(SlicePageSource::new(entries, criteria.page_size))).await
    }

    fn create_provider(&self) -> Result<Arc<dyn StorageProvider>> {
        Ok(Arc::new(LocalStorageProvider::from_shared(Arc::new(
            LocalContext {
                root: self.fs_path.clone(),
                casing: self.ctx.casing,
            },
        ))))
    }

    async fn delete_self(&self) -> Result<()> {
        if self.path.is_root() {
            return Err(Error::provider(
                ErrorCode::CannotDeleteRootFolder,
                "The root folder of a provider cannot be deleted",
            ));
        }

        match fs::remove_dir_all(&self.fs_path).await {
            Ok(()) => {
                info!(path = %self.path, "Deleted folder");
                Ok(())
            }
            Err(e) if is_missing(&e) => Err(Error::does_not_exist(&self.path)),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocalFolderEntry {
    /// Walk the directory synchronously; run inside `spawn_blocking`.
    fn enumerate(&self, filter: &EntryFilter, recursive: bool) -> Vec<Entry> {
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();

        for item in WalkDir::new(&self.fs_path)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let Some(relative) = relative_path(&self.fs_path, item.path()) else {
                debug!(path = %item.path().display(), "Skipping entry with unsupported name");
                continue;
            };
            let Ok(path) = self.path.join(&relative.as_string()) else {
                continue;
            };
            if !filter.matches(&path) {
                continue;
            }

            entries.push(self.to_entry(path, item.path().to_path_buf(), item.file_type().is_dir()));
        }

        entries
    }
}

/// Storage path of `fs_path` relative to `base`; `None` for names that are not
/// valid UTF-8 or not valid path segments.
fn relative_path(base: &Path, fs_path: &Path) -> Option<StoragePath> {
    let relative = fs_path.strip_prefix(base).ok()?;
    let mut path = StoragePath::root();
    for component in relative.components() {
        path = path.join(component.as_os_str().to_str()?).ok()?;
    }
    Some(path)
}

/// Create `fs_path` exclusively and fill it from `content`.
async fn write_new_file(fs_path: &Path, content: Option<ReadStream>) -> io::Result<()> {
    if let Some(parent) = fs_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(fs_path)
        .await?;

    let filled = async {
        if let Some(mut content) = content {
            tokio::io::copy(&mut content, &mut file).await?;
        }
        file.flush().await
    }
    .await;

    if let Err(e) = filled {
        drop(file);
        if let Err(cleanup) = fs::remove_file(fs_path).await {
            warn!(error = %cleanup, "Failed to remove partially written file");
        }
        return Err(e);
    }
    Ok(())
}
