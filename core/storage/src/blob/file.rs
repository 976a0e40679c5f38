use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use unistore_common::{Error, Result, StoragePath};

use super::client::BlobProperties;
use super::provider::{BlobContext, BlobStorageProvider};
use super::sas::{BlobSasRequest, SasCredential};
use super::staging::{PropertyCache, StagedWriteStream};
use crate::provider::{
    EntryInfo, FileEntry, ReadStream, StorageProvider, UserPropertyStore, WebAccess, WriteStream,
};
use crate::settings::ExternalAccessSettings;

/// A blob holding file content.
///
/// Properties are cached after the first read; `refresh` reloads them and a
/// committed write stream invalidates them.
#[derive(Debug, Clone)]
pub struct BlobFileEntry {
    ctx: Arc<BlobContext>,
    path: StoragePath,
    properties: PropertyCache,
}

impl BlobFileEntry {
    pub(crate) fn with_properties(
        ctx: Arc<BlobContext>,
        path: StoragePath,
        properties: BlobProperties,
    ) -> Self {
        Self {
            ctx,
            path,
            properties: Arc::new(RwLock::new(Some(properties))),
        }
    }

    fn key(&self) -> String {
        self.ctx.key_for(&self.path)
    }

    /// Cached properties, loaded on first use; `None` if the blob is gone.
    pub async fn properties(&self) -> Result<Option<BlobProperties>> {
        if let Some(properties) = self.properties.read().await.as_ref() {
            return Ok(Some(properties.clone()));
        }

        let loaded = self.ctx.blobs.get_properties(&self.key()).await?;
        if let Some(properties) = &loaded {
            *self.properties.write().await = Some(properties.clone());
        }
        Ok(loaded)
    }
}

#[async_trait]
impl EntryInfo for BlobFileEntry {
    fn path(&self) -> &StoragePath {
        &self.path
    }

    async fn last_modified(&self) -> Result<DateTime<Utc>> {
        self.properties()
            .await?
            .map(|properties| properties.last_modified)
            .ok_or_else(|| Error::does_not_exist(&self.path))
    }

    fn provider(&self) -> Arc<dyn StorageProvider> {
        Arc::new(BlobStorageProvider::from_context(self.ctx.clone()))
    }
}

#[async_trait]
impl FileEntry for BlobFileEntry {
    async fn length(&self) -> Result<i64> {
        Ok(self
            .properties()
            .await?
            .map_or(-1, |properties| properties.content_length as i64))
    }

    #[instrument(skip(self), fields(path = %self.path))]
    async fn open_read(&self) -> Result<ReadStream> {
        match self.ctx.blobs.download(&self.key()).await? {
            Some(content) => Ok(Box::new(Cursor::new(content))),
            None => Err(Error::does_not_exist(&self.path)),
        }
    }

    #[instrument(skip(self), fields(path = %self.path))]
    async fn open_write(&self) -> Result<Box<dyn WriteStream>> {
        let stream = StagedWriteStream::open(
            self.ctx.blobs.clone(),
            self.key(),
            self.path.clone(),
            self.properties.clone(),
        )
        .await?;
        Ok(Box::new(stream))
    }

    async fn refresh(&self) -> Result<()> {
        let loaded = self.ctx.blobs.get_properties(&self.key()).await?;
        *self.properties.write().await = loaded;
        Ok(())
    }

    fn web_access(&self) -> Option<&dyn WebAccess> {
        Some(self)
    }

    fn property_store(&self) -> Option<&dyn UserPropertyStore> {
        Some(self)
    }
}

#[async_trait]
impl WebAccess for BlobFileEntry {
    #[instrument(skip(self, settings), fields(path = %self.path))]
    async fn external_url(&self, settings: &ExternalAccessSettings) -> Result<Url> {
        let now = Utc::now();
        let expiry = settings.expiry.resolve(now)?;
        if expiry <= now {
            return Err(Error::InvalidInput(format!(
                "External URL expiry {} is in the past",
                expiry
            )));
        }

        let key = self.key();
        let content_type = settings.content_type_for(&self.path);
        let request = BlobSasRequest {
            account: self.ctx.blobs.account_name(),
            container: self.ctx.blobs.container_name(),
            blob: &key,
            permissions: settings.access.permissions(),
            start: None,
            expiry,
            content_type: content_type.as_deref(),
        };
        let base = self.ctx.blobs.blob_url(&key)?;

        let url = match self.ctx.blobs.shared_key() {
            Some(account_key) => request.sign_url(base, SasCredential::SharedKey(account_key))?,
            None => {
                let delegation_key = self.ctx.delegation_key(now, expiry).await?;
                request.sign_url(base, SasCredential::UserDelegation(&delegation_key))?
            }
        };

        debug!(expiry = %expiry, "Generated external URL");
        Ok(url)
    }
}

#[async_trait]
impl UserPropertyStore for BlobFileEntry {
    async fn user_properties(&self) -> Result<HashMap<String, String>> {
        self.properties()
            .await?
            .map(|properties| properties.metadata)
            .ok_or_else(|| Error::does_not_exist(&self.path))
    }

    async fn set_user_property(&self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidInput(format!(
                "Invalid property name: {:?}",
                name
            )));
        }

        let key = self.key();
        let mut metadata = self
            .ctx
            .blobs
            .get_properties(&key)
            .await?
            .map(|properties| properties.metadata)
            .ok_or_else(|| Error::does_not_exist(&self.path))?;
        metadata.insert(name.to_string(), value.to_string());

        self.ctx.blobs.set_metadata(&key, &metadata).await?;
        *self.properties.write().await = None;
        debug!(path = %self.path, property = name, "Updated user property");
        Ok(())
    }
}
