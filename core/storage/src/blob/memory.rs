//! In-memory blob store for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;
use uuid::Uuid;

use unistore_common::{Error, Result};

use super::client::{
    BlobClient, BlobItem, BlobProperties, DirectoryClient, ListPage, ListRequest,
    UploadOptions, UserDelegationKey, MAX_LIST_RESULTS,
};
use super::sas::{AccountKey, SAS_VERSION};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    properties: BlobProperties,
}

/// In-memory blob container.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. In hierarchical mode directories are kept as folder
/// marker blobs, the way a hierarchical account exposes them through the
/// blob API.
pub struct MemoryBlobStore {
    account: String,
    container: String,
    hierarchical: bool,
    shared_key: Option<AccountKey>,
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    fail_uploads: AtomicBool,
    delegation_key_fetches: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty flat container.
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            account: "memory".to_string(),
            container: container.into(),
            hierarchical: false,
            shared_key: None,
            blobs: RwLock::new(BTreeMap::new()),
            fail_uploads: AtomicBool::new(false),
            delegation_key_fetches: AtomicUsize::new(0),
        }
    }

    /// Create an empty container with a hierarchical namespace.
    pub fn hierarchical(container: impl Into<String>) -> Self {
        Self {
            hierarchical: true,
            ..Self::new(container)
        }
    }

    /// Sign URLs with an account key instead of delegation keys.
    pub fn with_shared_key(mut self, key: AccountKey) -> Self {
        self.shared_key = Some(key);
        self
    }

    pub fn is_hierarchical(&self) -> bool {
        self.hierarchical
    }

    /// Make every following upload fail with a network error.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// How many user delegation keys have been issued.
    pub fn delegation_key_fetches(&self) -> usize {
        self.delegation_key_fetches.load(Ordering::SeqCst)
    }

    /// Number of stored blobs, folder markers included.
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    fn properties(data: &Bytes, content_type: Option<String>, metadata: HashMap<String, String>) -> BlobProperties {
        BlobProperties {
            content_length: data.len() as u64,
            last_modified: Utc::now(),
            content_type,
            etag: Some(format!("\"{}\"", Uuid::new_v4())),
            metadata,
        }
    }

    fn marker() -> StoredBlob {
        let data = Bytes::new();
        let properties = Self::properties(&data, None, BlobProperties::folder_marker_metadata());
        StoredBlob { data, properties }
    }

    /// Insert markers for every ancestor directory of `key`.
    fn ensure_parents(blobs: &mut BTreeMap<String, StoredBlob>, key: &str) {
        let mut end = 0;
        while let Some(pos) = key[end..].find('/') {
            let parent = &key[..end + pos];
            blobs.entry(parent.to_string()).or_insert_with(Self::marker);
            end += pos + 1;
        }
    }

    fn is_directory(blobs: &BTreeMap<String, StoredBlob>, key: &str) -> bool {
        blobs
            .get(key)
            .is_some_and(|blob| blob.properties.is_folder_marker())
    }
}

#[async_trait]
impl BlobClient for MemoryBlobStore {
    fn account_name(&self) -> &str {
        &self.account
    }

    fn container_name(&self) -> &str {
        &self.container
    }

    fn blob_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse("http://127.0.0.1:10000/")
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput("Endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&self.account)
            .push(&self.container)
            .extend(key.split('/'));
        Ok(url)
    }

    fn shared_key(&self) -> Option<&AccountKey> {
        self.shared_key.as_ref()
    }

    async fn get_properties(&self, key: &str) -> Result<Option<BlobProperties>> {
        Ok(self.blobs.read().get(key).map(|blob| blob.properties.clone()))
    }

    async fn download(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().get(key).map(|blob| blob.data.clone()))
    }

    async fn upload(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<BlobProperties> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("Upload rejected: {}", key)));
        }

        let mut blobs = self.blobs.write();
        if self.hierarchical {
            if Self::is_directory(&blobs, key) {
                return Err(Error::InvalidInput(format!("A directory exists at: {}", key)));
            }
            Self::ensure_parents(&mut blobs, key);
        }

        let properties = Self::properties(&data, options.content_type.clone(), options.metadata.clone());
        blobs.insert(
            key.to_string(),
            StoredBlob {
                data,
                properties: properties.clone(),
            },
        );
        Ok(properties)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.write().remove(key).is_some())
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        let blobs = self.blobs.read();
        let max_results = match request.max_results {
            0 => MAX_LIST_RESULTS,
            n => n.min(MAX_LIST_RESULTS),
        };

        let start = match &request.marker {
            Some(marker) if marker.as_str() > request.prefix.as_str() => marker.clone(),
            _ => request.prefix.clone(),
        };

        let mut page = ListPage::default();
        let mut returned = 0;

        for (name, blob) in blobs.range(start..) {
            if !name.starts_with(&request.prefix) {
                break;
            }

            let rest = &name[request.prefix.len()..];
            let rolled_up = request.delimiter.as_deref().and_then(|delimiter| {
                rest.find(delimiter)
                    .map(|pos| format!("{}{}", request.prefix, &rest[..pos + delimiter.len()]))
            });

            if let Some(prefix) = &rolled_up {
                if page.prefixes.last() == Some(prefix) {
                    continue;
                }
                // A directory marker was already listed for this prefix.
                let directory = prefix.trim_end_matches('/');
                if self.hierarchical && Self::is_directory(&blobs, directory) {
                    continue;
                }
            }

            if returned == max_results {
                page.next_marker = Some(name.clone());
                break;
            }
            returned += 1;

            match rolled_up {
                Some(prefix) => page.prefixes.push(prefix),
                None => page.blobs.push(BlobItem {
                    name: name.clone(),
                    properties: blob.properties.clone(),
                }),
            }
        }

        Ok(page)
    }

    async fn set_metadata(&self, key: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let mut blobs = self.blobs.write();
        let blob = blobs.get_mut(key).ok_or_else(|| Error::does_not_exist(key))?;
        blob.properties.metadata = metadata.clone();
        blob.properties.last_modified = Utc::now();
        Ok(())
    }

    async fn get_user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey> {
        if expiry > start + Duration::days(7) {
            return Err(Error::InvalidInput(
                "User delegation keys are valid for at most seven days".to_string(),
            ));
        }

        self.delegation_key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(UserDelegationKey {
            signed_oid: Uuid::new_v4().to_string(),
            signed_tid: Uuid::new_v4().to_string(),
            signed_start: start,
            signed_expiry: expiry,
            signed_service: "b".to_string(),
            signed_version: SAS_VERSION.to_string(),
            value: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                Uuid::new_v4().as_bytes(),
            ),
        })
    }
}

#[async_trait]
impl DirectoryClient for MemoryBlobStore {
    async fn create_directory(&self, key: &str) -> Result<()> {
        if !self.hierarchical {
            return Err(Error::Unsupported(
                "Directories require a hierarchical namespace".to_string(),
            ));
        }

        let mut blobs = self.blobs.write();
        match blobs.get(key) {
            Some(blob) if !blob.properties.is_folder_marker() => {
                return Err(Error::InvalidInput(format!("A blob exists at: {}", key)));
            }
            Some(_) => {}
            None => {
                blobs.insert(key.to_string(), Self::marker());
            }
        }
        Self::ensure_parents(&mut blobs, key);
        Ok(())
    }

    async fn delete_directory(&self, key: &str) -> Result<bool> {
        let mut blobs = self.blobs.write();
        if !Self::is_directory(&blobs, key) {
            return Ok(false);
        }

        let prefix = format!("{}/", key);
        blobs.retain(|name, _| name != key && !name.starts_with(&prefix));
        Ok(true)
    }

    async fn directory_exists(&self, key: &str) -> Result<bool> {
        Ok(Self::is_directory(&self.blobs.read(), key))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut blobs = self.blobs.write();
        if !blobs.contains_key(from) {
            return Err(Error::does_not_exist(from));
        }
        if blobs.contains_key(to) {
            return Err(Error::InvalidInput(format!("Rename target exists: {}", to)));
        }

        let prefix = format!("{}/", from);
        let moved: Vec<String> = blobs
            .keys()
            .filter(|name| name.as_str() == from || name.starts_with(&prefix))
            .cloned()
            .collect();

        for name in moved {
            if let Some(blob) = blobs.remove(&name) {
                let renamed = format!("{}{}", to, &name[from.len()..]);
                blobs.insert(renamed, blob);
            }
        }
        Self::ensure_parents(&mut blobs, to);
        Ok(())
    }
}
