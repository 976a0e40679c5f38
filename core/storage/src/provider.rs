//! Storage provider and entry contracts.
//!
//! A provider only has to open its root folder; every path-based operation in
//! [`StorageProviderExt`] is derived from the folder contract, so each backend
//! implements [`FolderEntry`] and [`FileEntry`] and inherits uniform
//! navigation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use url::Url;

use unistore_common::{Error, ErrorCode, MatchCasing, Result, StoragePath};

use crate::find::{FindCriteria, FindResults};
use crate::settings::{CreateFileArgs, ExternalAccessSettings};

/// Byte stream returned by `open_read`.
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Seekable write stream returned by `open_write`.
///
/// `close` is the commit point. Backends that stage writes persist them there;
/// dropping an unclosed stream falls back to a best-effort commit.
#[async_trait]
pub trait WriteStream: AsyncWrite + AsyncSeek + Send + Unpin {
    /// Truncate or extend the stream to `len` bytes.
    async fn set_len(&mut self, len: u64) -> Result<()>;

    /// Flush and commit everything written so far.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Capabilities shared by files and folders.
#[async_trait]
pub trait EntryInfo: Send + Sync {
    /// Last path segment; empty for a provider root.
    fn name(&self) -> &str {
        self.path().name()
    }

    /// Path relative to the owning provider's root.
    fn path(&self) -> &StoragePath;

    /// Last modification time as reported by the backend.
    async fn last_modified(&self) -> Result<DateTime<Utc>>;

    /// The provider this entry belongs to.
    fn provider(&self) -> Arc<dyn StorageProvider>;
}

/// A file inside a storage provider.
#[async_trait]
pub trait FileEntry: EntryInfo {
    /// Byte length, or `-1` if the file does not exist.
    async fn length(&self) -> Result<i64>;

    /// Extension including the leading dot, or an empty string.
    fn extension(&self) -> &str {
        self.path().extension()
    }

    /// Open the current content for reading.
    ///
    /// # Errors
    /// - `DoesNotExist` if the file is gone
    async fn open_read(&self) -> Result<ReadStream>;

    /// Open the file for random-access writing, creating it if needed.
    async fn open_write(&self) -> Result<Box<dyn WriteStream>>;

    /// Drop cached properties and reload them from the backend.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Signed external URL support, if the backend has it.
    fn web_access(&self) -> Option<&dyn WebAccess> {
        None
    }

    /// Arbitrary string metadata, if the backend has it.
    fn property_store(&self) -> Option<&dyn UserPropertyStore> {
        None
    }
}

/// A folder inside a storage provider.
///
/// Every `path` argument is relative to this folder and may contain several
/// segments; it passes through path validation before any I/O.
#[async_trait]
pub trait FolderEntry: EntryInfo {
    /// Create a new file, failing if one already exists.
    ///
    /// # Errors
    /// - `CannotCreateFileWhenItAlreadyExists` if the target exists
    /// - `CannotCreateFile` if the backend fails to create or fill it
    async fn create_file(&self, path: &str, args: CreateFileArgs) -> Result<Arc<dyn FileEntry>>;

    /// Create a folder and any missing parents.
    async fn create_folder(&self, path: &str) -> Result<Arc<dyn FolderEntry>>;

    /// Delete a file, or a folder with all of its content.
    ///
    /// An empty path deletes this folder itself.
    ///
    /// # Errors
    /// - `DoesNotExist` if nothing exists at the path
    /// - `CannotDeleteRootFolder` if the target is the provider root
    async fn delete(&self, path: &str) -> Result<()>;

    /// Open a child entry; `None` if it does not exist.
    async fn open(&self, path: &str) -> Result<Option<Entry>>;

    /// First page of entries matching `criteria`.
    async fn find(&self, criteria: &FindCriteria) -> Result<FindResults>;

    /// A new provider whose root is this folder.
    fn create_provider(&self) -> Result<Arc<dyn StorageProvider>>;

    /// Delete this folder and everything below it.
    async fn delete_self(&self) -> Result<()>;

    fn is_root(&self) -> bool {
        self.path().is_root()
    }
}

/// Generation of time-limited external URLs.
#[async_trait]
pub trait WebAccess: Send + Sync {
    async fn external_url(&self, settings: &ExternalAccessSettings) -> Result<Url>;
}

/// Arbitrary string metadata attached to an entry.
#[async_trait]
pub trait UserPropertyStore: Send + Sync {
    async fn user_properties(&self) -> Result<HashMap<String, String>>;

    async fn user_property(&self, name: &str) -> Result<Option<String>> {
        Ok(self.user_properties().await?.remove(name))
    }

    async fn set_user_property(&self, name: &str, value: &str) -> Result<()>;
}

/// A file or folder handle.
#[derive(Clone)]
pub enum Entry {
    File(Arc<dyn FileEntry>),
    Folder(Arc<dyn FolderEntry>),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(file) => file.name(),
            Entry::Folder(folder) => folder.name(),
        }
    }

    pub fn path(&self) -> &StoragePath {
        match self {
            Entry::File(file) => file.path(),
            Entry::Folder(folder) => folder.path(),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entry::Folder(_))
    }

    pub async fn last_modified(&self) -> Result<DateTime<Utc>> {
        match self {
            Entry::File(file) => file.last_modified().await,
            Entry::Folder(folder) => folder.last_modified().await,
        }
    }

    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        match self {
            Entry::File(file) => file.provider(),
            Entry::Folder(folder) => folder.provider(),
        }
    }

    pub fn as_file(&self) -> Option<&Arc<dyn FileEntry>> {
        match self {
            Entry::File(file) => Some(file),
            Entry::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Arc<dyn FolderEntry>> {
        match self {
            Entry::Folder(folder) => Some(folder),
            Entry::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<Arc<dyn FileEntry>> {
        match self {
            Entry::File(file) => Some(file),
            Entry::Folder(_) => None,
        }
    }

    pub fn into_folder(self) -> Option<Arc<dyn FolderEntry>> {
        match self {
            Entry::Folder(folder) => Some(folder),
            Entry::File(_) => None,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_folder() { "Folder" } else { "File" };
        f.debug_struct(kind).field("path", &self.path().as_string()).finish()
    }
}

/// Storage provider trait for different backends.
///
/// Dropping a provider releases backend handles but never deletes data.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "blob").
    fn name(&self) -> &str;

    /// How names are compared when resolving paths.
    fn match_casing(&self) -> MatchCasing;

    /// Open the folder every path of this provider is relative to.
    async fn open_root_folder(&self) -> Result<Arc<dyn FolderEntry>>;
}

/// Path-based operations derived from the root folder.
#[async_trait]
pub trait StorageProviderExt: StorageProvider {
    /// Open any entry by path; `None` if it does not exist.
    async fn open(&self, path: &str) -> Result<Option<Entry>> {
        let target = StoragePath::parse(path)?;
        let root = self.open_root_folder().await?;
        if target.is_root() {
            return Ok(Some(Entry::Folder(root)));
        }
        root.open(&target.as_string()).await
    }

    /// Open a file by path; `None` if missing or a folder.
    async fn open_file(&self, path: &str) -> Result<Option<Arc<dyn FileEntry>>> {
        Ok(self.open(path).await?.and_then(Entry::into_file))
    }

    /// Open a folder by path; `None` if missing or a file.
    async fn open_folder(&self, path: &str) -> Result<Option<Arc<dyn FolderEntry>>> {
        Ok(self.open(path).await?.and_then(Entry::into_folder))
    }

    /// Open a folder, creating it and its parents when missing.
    async fn open_or_create_folder(&self, path: &str) -> Result<Arc<dyn FolderEntry>> {
        let target = StoragePath::parse(path)?;
        let root = self.open_root_folder().await?;
        if target.is_root() {
            return Ok(root);
        }
        match root.open(&target.as_string()).await? {
            Some(Entry::Folder(folder)) => Ok(folder),
            Some(Entry::File(_)) => Err(Error::InvalidInput(format!(
                "A file exists at folder path: {}",
                target
            ))),
            None => root.create_folder(&target.as_string()).await,
        }
    }

    /// Open a file's content for reading.
    ///
    /// # Errors
    /// - `DoesNotExist` if no file exists at the path
    async fn open_file_read_stream(&self, path: &str) -> Result<ReadStream> {
        match self.open_file(path).await? {
            Some(file) => file.open_read().await,
            None => Err(Error::does_not_exist(path)),
        }
    }

    /// Delete the entry at `path`.
    async fn delete(&self, path: &str) -> Result<()> {
        let target = StoragePath::parse(path)?;
        if target.is_root() {
            return Err(Error::provider(
                ErrorCode::CannotDeleteRootFolder,
                "The root folder of a provider cannot be deleted",
            ));
        }
        let root = self.open_root_folder().await?;
        root.delete(&target.as_string()).await
    }
}

impl<T: StorageProvider + ?Sized> StorageProviderExt for T {}
