//! Backend contract consumed by the blob provider.
//!
//! [`BlobClient`] covers the flat blob API. [`DirectoryClient`] is only
//! supplied for hierarchical-namespace accounts, where directories are real
//! objects with their own create/delete/exists/rename operations.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use url::Url;

use unistore_common::Result;

use super::sas::AccountKey;

/// Metadata key marking a zero-length blob as a directory placeholder.
pub const FOLDER_MARKER_KEY: &str = "hdi_isfolder";

/// Largest page the blob API returns.
pub const MAX_LIST_RESULTS: usize = 5000;

/// System and user properties of one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobProperties {
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl BlobProperties {
    /// Whether this blob is a placeholder standing in for a directory.
    pub fn is_folder_marker(&self) -> bool {
        self.content_length == 0
            && self
                .metadata
                .get(FOLDER_MARKER_KEY)
                .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    /// Metadata that marks a placeholder blob.
    pub fn folder_marker_metadata() -> HashMap<String, String> {
        HashMap::from([(FOLDER_MARKER_KEY.to_string(), "true".to_string())])
    }
}

/// A blob returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub properties: BlobProperties,
}

/// Prefix listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Only keys starting with this prefix.
    pub prefix: String,
    /// Roll keys up to the next occurrence of this string into prefixes.
    pub delimiter: Option<String>,
    /// Continuation marker from a previous page.
    pub marker: Option<String>,
    /// Page size; `0` means the backend maximum.
    pub max_results: usize,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub blobs: Vec<BlobItem>,
    /// Rolled-up prefixes, each ending with the delimiter.
    pub prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

/// Options applied when a blob is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Signing key issued by the backend for user-delegation SAS.
#[derive(Clone, PartialEq, Eq)]
pub struct UserDelegationKey {
    pub signed_oid: String,
    pub signed_tid: String,
    pub signed_start: DateTime<Utc>,
    pub signed_expiry: DateTime<Utc>,
    pub signed_service: String,
    pub signed_version: String,
    /// Base64-encoded key material.
    pub value: String,
}

impl fmt::Debug for UserDelegationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDelegationKey")
            .field("signed_oid", &self.signed_oid)
            .field("signed_start", &self.signed_start)
            .field("signed_expiry", &self.signed_expiry)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Blob operations on a single container.
#[async_trait]
pub trait BlobClient: Send + Sync {
    fn account_name(&self) -> &str;

    fn container_name(&self) -> &str;

    /// Unsigned URL of the blob at `key`.
    fn blob_url(&self, key: &str) -> Result<Url>;

    /// Account key, when the client signs with one.
    fn shared_key(&self) -> Option<&AccountKey> {
        None
    }

    /// Properties of the blob at `key`; `None` if it does not exist.
    async fn get_properties(&self, key: &str) -> Result<Option<BlobProperties>>;

    /// Content of the blob at `key`; `None` if it does not exist.
    async fn download(&self, key: &str) -> Result<Option<Bytes>>;

    /// Create or overwrite the blob at `key`.
    async fn upload(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<BlobProperties>;

    /// Delete the blob at `key`; `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn list(&self, request: &ListRequest) -> Result<ListPage>;

    /// Replace the user metadata of the blob at `key`.
    async fn set_metadata(&self, key: &str, metadata: &HashMap<String, String>) -> Result<()>;

    async fn get_user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey>;
}

/// Directory operations of a hierarchical namespace.
///
/// Keys are directory paths inside the container, without a trailing `/`.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Create the directory and any missing parents.
    async fn create_directory(&self, key: &str) -> Result<()>;

    /// Delete the directory and its content; `false` if it did not exist.
    async fn delete_directory(&self, key: &str) -> Result<bool>;

    async fn directory_exists(&self, key: &str) -> Result<bool>;

    /// Move a file or directory to a new key.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_marker_detection() {
        let marker = BlobProperties {
            metadata: BlobProperties::folder_marker_metadata(),
            ..Default::default()
        };
        assert!(marker.is_folder_marker());

        let with_content = BlobProperties {
            content_length: 3,
            ..marker.clone()
        };
        assert!(!with_content.is_folder_marker());

        let mut upper = marker;
        upper
            .metadata
            .insert(FOLDER_MARKER_KEY.to_string(), "True".to_string());
        assert!(upper.is_folder_marker());

        assert!(!BlobProperties::default().is_folder_marker());
    }
}
