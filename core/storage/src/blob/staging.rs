//! Stage-then-commit write stream.
//!
//! Writes land in an anonymous temp file. The blob is only overwritten when
//! the stream is closed, and only if something was written or truncated.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use unistore_common::{Result, StoragePath};

use super::client::{BlobClient, BlobProperties, UploadOptions};
use crate::provider::WriteStream;

/// Property cache shared between a file entry and its write streams.
pub(crate) type PropertyCache = Arc<RwLock<Option<BlobProperties>>>;

/// Where and how staged bytes are committed.
struct CommitTarget {
    blobs: Arc<dyn BlobClient>,
    key: String,
    path: StoragePath,
    options: UploadOptions,
    cache: PropertyCache,
}

impl CommitTarget {
    async fn commit(self, mut staging: File) -> Result<()> {
        staging.flush().await?;
        staging.seek(SeekFrom::Start(0)).await?;
        let mut data = Vec::new();
        staging.read_to_end(&mut data).await?;

        let length = data.len();
        self.blobs
            .upload(&self.key, Bytes::from(data), &self.options)
            .await?;
        *self.cache.write().await = None;

        info!(path = %self.path, length, "Committed staged write");
        Ok(())
    }
}

/// Write stream over a local staging copy of a blob.
pub struct StagedWriteStream {
    staging: Option<File>,
    target: Option<CommitTarget>,
    dirty: bool,
}

impl StagedWriteStream {
    /// Stage the current content of `key`, if any.
    pub(crate) async fn open(
        blobs: Arc<dyn BlobClient>,
        key: String,
        path: StoragePath,
        cache: PropertyCache,
    ) -> Result<Self> {
        let mut staging = File::from_std(tempfile::tempfile()?);

        let existing = blobs.get_properties(&key).await?;
        let options = match &existing {
            Some(properties) => UploadOptions {
                content_type: properties.content_type.clone(),
                metadata: properties.metadata.clone(),
            },
            None => UploadOptions {
                content_type: mime_guess::from_path(path.name())
                    .first()
                    .map(|mime| mime.essence_str().to_string()),
                metadata: Default::default(),
            },
        };

        if existing.is_some() {
            if let Some(content) = blobs.download(&key).await? {
                staging.write_all(&content).await?;
                staging.flush().await?;
                staging.seek(SeekFrom::Start(0)).await?;
            }
        }

        debug!(path = %path, existing = existing.is_some(), "Opened staged write stream");
        Ok(Self {
            staging: Some(staging),
            target: Some(CommitTarget {
                blobs,
                key,
                path,
                options,
                cache,
            }),
            dirty: false,
        })
    }

    /// Whether a write or length change is waiting to be committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn staging(&mut self) -> io::Result<&mut File> {
        self.staging
            .as_mut()
            .ok_or_else(|| io::Error::other("write stream is closed"))
    }
}

impl AsyncWrite for StagedWriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(this.staging()?).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            if *written > 0 {
                this.dirty = true;
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().staging()?).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().staging()?).poll_shutdown(cx)
    }
}

impl AsyncSeek for StagedWriteStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(self.get_mut().staging()?).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(self.get_mut().staging()?).poll_complete(cx)
    }
}

#[async_trait]
impl WriteStream for StagedWriteStream {
    async fn set_len(&mut self, len: u64) -> Result<()> {
        let staging = self.staging()?;
        staging.flush().await?;
        File::set_len(staging, len).await?;
        self.dirty = true;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let staging = this.staging.take();
        let target = this.target.take();
        let dirty = std::mem::replace(&mut this.dirty, false);

        match (staging, target) {
            (Some(staging), Some(target)) if dirty => target.commit(staging).await,
            (_, Some(target)) => {
                debug!(path = %target.path, "Closed unmodified write stream");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Drop for StagedWriteStream {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        let (Some(staging), Some(target)) = (self.staging.take(), self.target.take()) else {
            return;
        };

        let path = target.path.clone();
        match Handle::try_current() {
            Ok(handle) => {
                warn!(path = %path, "Write stream dropped without close; committing in background");
                handle.spawn(async move {
                    match target.commit(staging).await {
                        Ok(()) => debug!(path = %path, "Background commit finished"),
                        Err(e) => warn!(path = %path, error = %e, "Background commit failed"),
                    }
                });
            }
            Err(_) => {
                warn!(path = %path, "Write stream dropped outside a runtime; changes discarded");
            }
        }
    }
}
