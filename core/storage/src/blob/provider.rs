use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use unistore_common::{validate_segments, Error, MatchCasing, Result, StoragePath};

use super::client::{BlobClient, BlobProperties, DirectoryClient, ListRequest, UserDelegationKey};
use super::folder::BlobFolderEntry;
use crate::provider::{FolderEntry, StorageProvider};

/// Longest validity the backend grants a user delegation key, in days.
pub const MAX_DELEGATION_KEY_DAYS: i64 = 7;

/// Shortest validity requested for a new user delegation key, in days.
pub const MIN_DELEGATION_KEY_DAYS: i64 = 1;

pub(crate) type DelegationKeyCache = Arc<RwLock<Option<UserDelegationKey>>>;

/// State shared by a provider and every entry it hands out.
pub(crate) struct BlobContext {
    pub blobs: Arc<dyn BlobClient>,
    pub directories: Option<Arc<dyn DirectoryClient>>,
    /// Normalized key prefix, without leading or trailing separator.
    pub root: String,
    pub casing: MatchCasing,
    delegation_key: DelegationKeyCache,
}

impl BlobContext {
    /// Blob key of `path`.
    pub fn key_for(&self, path: &StoragePath) -> String {
        match (self.root.is_empty(), path.is_root()) {
            (true, _) => path.as_string(),
            (false, true) => self.root.clone(),
            (false, false) => format!("{}/{}", self.root, path.as_string()),
        }
    }

    /// Listing prefix for the content of the folder at `path`.
    pub fn prefix_for(&self, path: &StoragePath) -> String {
        let key = self.key_for(path);
        if key.is_empty() {
            key
        } else {
            format!("{}/", key)
        }
    }

    /// Provider path of a blob key; `None` for keys outside the root or with
    /// names that are not valid paths.
    pub fn path_for(&self, key: &str) -> Option<StoragePath> {
        let relative = if self.root.is_empty() {
            key
        } else {
            key.strip_prefix(self.root.as_str())?.strip_prefix('/')?
        };
        StoragePath::parse(relative.trim_end_matches('/')).ok()
    }

    pub fn is_hierarchical(&self) -> bool {
        self.directories.is_some()
    }

    /// Whether a folder exists at `path`, given no plain blob lives there.
    pub async fn folder_exists(&self, path: &StoragePath, properties: Option<&BlobProperties>) -> Result<bool> {
        if path.is_root() {
            return Ok(true);
        }

        let key = self.key_for(path);
        if let Some(directories) = &self.directories {
            return directories.directory_exists(&key).await;
        }
        if properties.is_some_and(BlobProperties::is_folder_marker) {
            return Ok(true);
        }

        let probe = self
            .blobs
            .list(&ListRequest {
                prefix: format!("{}/", key),
                max_results: 1,
                ..Default::default()
            })
            .await?;
        Ok(!probe.blobs.is_empty() || !probe.prefixes.is_empty())
    }

    /// A context rooted at `path`, sharing clients and the key cache.
    pub fn scoped(&self, path: &StoragePath) -> Self {
        Self {
            blobs: self.blobs.clone(),
            directories: self.directories.clone(),
            root: self.key_for(path),
            casing: self.casing,
            delegation_key: self.delegation_key.clone(),
        }
    }

    /// A user delegation key valid at least until `expiry`.
    ///
    /// The cached key is reused while it covers `expiry`; otherwise a new one
    /// valid for at least a day is fetched and replaces it.
    pub async fn delegation_key(
        &self,
        now: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey> {
        if let Some(key) = self.delegation_key.read().await.as_ref() {
            if key.signed_expiry >= expiry {
                debug!(key_expiry = %key.signed_expiry, "Reusing user delegation key");
                return Ok(key.clone());
            }
        }

        let longest = now + Duration::days(MAX_DELEGATION_KEY_DAYS);
        if expiry > longest {
            return Err(Error::InvalidInput(format!(
                "Expiry {} is beyond the longest delegation key lifetime",
                expiry
            )));
        }

        let key_expiry = expiry.max(now + Duration::days(MIN_DELEGATION_KEY_DAYS)).min(longest);
        info!(key_expiry = %key_expiry, "Refreshing user delegation key");
        let key = self.blobs.get_user_delegation_key(now, key_expiry).await?;
        *self.delegation_key.write().await = Some(key.clone());
        Ok(key)
    }
}

impl fmt::Debug for BlobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobContext")
            .field("account", &self.blobs.account_name())
            .field("container", &self.blobs.container_name())
            .field("root", &self.root)
            .field("hierarchical", &self.is_hierarchical())
            .finish()
    }
}

/// Blob storage provider.
///
/// Folders are key prefixes below a root key. With a [`DirectoryClient`]
/// they are real directories of a hierarchical namespace.
#[derive(Debug, Clone)]
pub struct BlobStorageProvider {
    ctx: Arc<BlobContext>,
}

impl BlobStorageProvider {
    /// Create a provider over `blobs`, rooted at the key prefix `root`.
    ///
    /// # Errors
    /// - `NotWithinTree` if `root` is not a valid path
    pub fn new(
        blobs: Arc<dyn BlobClient>,
        directories: Option<Arc<dyn DirectoryClient>>,
        root: &str,
        casing: MatchCasing,
    ) -> Result<Self> {
        let root = validate_segments(root)?.join("/");
        debug!(
            container = blobs.container_name(),
            root = %root,
            hierarchical = directories.is_some(),
            "Created blob provider"
        );

        Ok(Self::from_context(Arc::new(BlobContext {
            blobs,
            directories,
            root,
            casing,
            delegation_key: Arc::new(RwLock::new(None)),
        })))
    }

    pub(crate) fn from_context(ctx: Arc<BlobContext>) -> Self {
        Self { ctx }
    }

    /// Key prefix every path of this provider lives under.
    pub fn root_key(&self) -> &str {
        &self.ctx.root
    }

    /// Move a file or folder inside a hierarchical namespace.
    ///
    /// # Errors
    /// - `Unsupported` without a directory client
    /// - `DoesNotExist` if nothing exists at `from`
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let directories = self.ctx.directories.as_ref().ok_or_else(|| {
            Error::Unsupported("Rename requires a hierarchical namespace".to_string())
        })?;

        let from = StoragePath::parse(from)?;
        let to = StoragePath::parse(to)?;
        if from.is_root() || to.is_root() {
            return Err(Error::InvalidInput("Cannot rename the root folder".to_string()));
        }

        directories
            .rename(&self.ctx.key_for(&from), &self.ctx.key_for(&to))
            .await?;
        info!(from = %from, to = %to, "Renamed entry");
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for BlobStorageProvider {
    fn name(&self) -> &str {
        "blob"
    }

    fn match_casing(&self) -> MatchCasing {
        self.ctx.casing
    }

    async fn open_root_folder(&self) -> Result<Arc<dyn FolderEntry>> {
        Ok(Arc::new(BlobFolderEntry::new(
            self.ctx.clone(),
            StoragePath::root(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;

    fn context(root: &str) -> Arc<BlobContext> {
        let store = Arc::new(MemoryBlobStore::new("c"));
        BlobStorageProvider::new(store, None, root, MatchCasing::Sensitive)
            .unwrap()
            .ctx
    }

    #[test]
    fn test_root_is_normalized() {
        assert_eq!(context("/tenants/acme/").root, "tenants/acme");
        assert_eq!(context("").root, "");
        assert_eq!(context("\\a\\b").root, "a/b");
    }

    #[test]
    fn test_key_mapping() {
        let ctx = context("tenants/acme");
        let path = StoragePath::parse("docs/a.txt").unwrap();
        assert_eq!(ctx.key_for(&path), "tenants/acme/docs/a.txt");
        assert_eq!(ctx.key_for(&StoragePath::root()), "tenants/acme");
        assert_eq!(ctx.prefix_for(&StoragePath::root()), "tenants/acme/");
        assert_eq!(ctx.path_for("tenants/acme/docs/a.txt"), Some(path));
        assert_eq!(ctx.path_for("tenants/other/a.txt"), None);
        assert_eq!(ctx.path_for("tenants/acmex/a.txt"), None);

        let ctx = context("");
        assert_eq!(ctx.key_for(&StoragePath::parse("a").unwrap()), "a");
        assert_eq!(ctx.prefix_for(&StoragePath::root()), "");
        assert_eq!(
            ctx.path_for("a/b/"),
            Some(StoragePath::parse("a/b").unwrap())
        );
    }

    #[test]
    fn test_invalid_root_is_rejected() {
        let store = Arc::new(MemoryBlobStore::new("c"));
        assert!(BlobStorageProvider::new(store, None, "a/../b", MatchCasing::Sensitive).is_err());
    }

    #[tokio::test]
    async fn test_delegation_key_is_reused_while_it_covers_expiry() {
        let store = Arc::new(MemoryBlobStore::new("c"));
        let provider =
            BlobStorageProvider::new(store.clone(), None, "", MatchCasing::Sensitive).unwrap();
        let ctx = &provider.ctx;
        let now = Utc::now();

        let first = ctx.delegation_key(now, now + Duration::hours(1)).await.unwrap();
        assert!(first.signed_expiry >= now + Duration::days(MIN_DELEGATION_KEY_DAYS));
        ctx.delegation_key(now, now + Duration::hours(20)).await.unwrap();
        assert_eq!(store.delegation_key_fetches(), 1);

        let longer = ctx.delegation_key(now, now + Duration::days(3)).await.unwrap();
        assert_eq!(store.delegation_key_fetches(), 2);
        assert_eq!(longer.signed_expiry, now + Duration::days(3));

        let scoped = ctx.scoped(&StoragePath::parse("sub").unwrap());
        scoped.delegation_key(now, now + Duration::days(2)).await.unwrap();
        assert_eq!(store.delegation_key_fetches(), 2);

        let err = ctx.delegation_key(now, now + Duration::days(8)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
