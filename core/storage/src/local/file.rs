use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use unistore_common::{Error, Result, StoragePath};

use super::{is_missing, modified_at, LocalContext, LocalStorageProvider};
use crate::provider::{EntryInfo, FileEntry, ReadStream, StorageProvider, WriteStream};

/// A regular file below the provider root.
#[derive(Debug, Clone)]
pub struct LocalFileEntry {
    ctx: Arc<LocalContext>,
    path: StoragePath,
    fs_path: PathBuf,
}

impl LocalFileEntry {
    pub(crate) fn new(ctx: Arc<LocalContext>, path: StoragePath, fs_path: PathBuf) -> Self {
        Self { ctx, path, fs_path }
    }
}

#[async_trait]
impl EntryInfo for LocalFileEntry {
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
impl FileEntry for LocalFileEntry {
    async fn length(&self) -> Result<i64> {
        match fs::metadata(&self.fs_path).await {
            Ok(metadata) => Ok(metadata.len() as i64),
            Err(e) if is_missing(&e) => Ok(-1),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_read(&self) -> Result<ReadStream> {
        match File::open(&self.fs_path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if is_missing(&e) => Err(Error::does_not_exist(&self.path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_write(&self) -> Result<Box<dyn WriteStream>> {
        if let Some(parent) = self.fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.fs_path)
            .await?;

        debug!(path = %self.path, "Opened file for writing");
        Ok(Box::new(file))
    }
}

/// Local writes go straight to disk; closing only flushes and syncs.
#[async_trait]
impl WriteStream for File {
    async fn set_len(&mut self, len: u64) -> Result<()> {
        self.flush().await?;
        File::set_len(self, len).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut file = *self;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
