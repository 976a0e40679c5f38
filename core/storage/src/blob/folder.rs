use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

use unistore_common::{Error, ErrorCode, MatchCasing, Result, StoragePath};

use super::client::{BlobProperties, ListRequest, UploadOptions};
use super::file::BlobFileEntry;
use super::provider::{BlobContext, BlobStorageProvider};
use crate::find::{ContinuationToken, EntryFilter, FindCriteria, FindResults, PageSource, RawPage};
use crate::provider::{Entry, EntryInfo, FileEntry, FolderEntry, StorageProvider};
use crate::settings::CreateFileArgs;

/// A folder: a key prefix, a folder marker blob, or a hierarchical directory.
#[derive(Debug, Clone)]
pub struct BlobFolderEntry {
    ctx: Arc<BlobContext>,
    path: StoragePath,
}

impl BlobFolderEntry {
    pub(crate) fn new(ctx: Arc<BlobContext>, path: StoragePath) -> Self {
        Self { ctx, path }
    }

    fn folder(&self, path: StoragePath) -> Entry {
        Entry::Folder(Arc::new(BlobFolderEntry::new(self.ctx.clone(), path)))
    }

    /// Entry at exactly `path`, without case folding.
    async fn lookup(&self, path: &StoragePath) -> Result<Option<Entry>> {
        if path.is_root() {
            return Ok(Some(self.folder(path.clone())));
        }

        let key = self.ctx.key_for(path);
        let properties = self.ctx.blobs.get_properties(&key).await?;
        if let Some(props) = &properties {
            if !props.is_folder_marker() {
                return Ok(Some(Entry::File(Arc::new(BlobFileEntry::with_properties(
                    self.ctx.clone(),
                    path.clone(),
                    props.clone(),
                )))));
            }
        }

        if self.ctx.folder_exists(path, properties.as_ref()).await? {
            return Ok(Some(self.folder(path.clone())));
        }
        Ok(None)
    }

    /// Resolve `path` one segment at a time, comparing names without case.
    async fn resolve_ignoring_case(&self, path: &StoragePath) -> Result<Option<StoragePath>> {
        let mut actual = StoragePath::root();
        for segment in path.segments() {
            let Some(name) = self.child_name_ignoring_case(&actual, segment).await? else {
                return Ok(None);
            };
            actual = actual.join(&name)?;
        }
        Ok(Some(actual))
    }

    async fn child_name_ignoring_case(&self, parent: &StoragePath, wanted: &str) -> Result<Option<String>> {
        let mut request = ListRequest {
            prefix: self.ctx.prefix_for(parent),
            delimiter: Some("/".to_string()),
            ..Default::default()
        };

        loop {
            let page = self.ctx.blobs.list(&request).await?;
            let names = page
                .blobs
                .iter()
                .map(|blob| blob.name.as_str())
                .chain(page.prefixes.iter().map(String::as_str));
            for key in names {
                let name = key[request.prefix.len()..].trim_end_matches('/');
                if MatchCasing::Insensitive.names_equal(name, wanted) {
                    return Ok(Some(name.to_string()));
                }
            }

            match page.next_marker {
                Some(marker) => request.marker = Some(marker),
                None => return Ok(None),
            }
        }
    }

    /// Where a new entry at `target` belongs.
    ///
    /// When names are compared without case, existing ancestors keep their
    /// stored names and only the missing trailing segments use the given casing.
    async fn placement(&self, target: StoragePath) -> Result<StoragePath> {
        if self.ctx.casing == MatchCasing::Sensitive {
            return Ok(target);
        }

        let mut actual = StoragePath::root();
        let mut existing = true;
        for segment in target.segments() {
            let found = if existing {
                self.child_name_ignoring_case(&actual, segment).await?
            } else {
                None
            };
            let name = found.unwrap_or_else(|| {
                existing = false;
                segment.clone()
            });
            actual = actual.join(&name)?;
        }
        Ok(actual)
    }

    /// Delete a folder tree; `false` if nothing was there.
    async fn delete_tree(&self, path: &StoragePath) -> Result<bool> {
        let key = self.ctx.key_for(path);
        if let Some(directories) = &self.ctx.directories {
            return directories.delete_directory(&key).await;
        }

        let mut deleted = 0usize;
        let mut request = ListRequest {
            prefix: format!("{}/", key),
            ..Default::default()
        };
        loop {
            let page = self.ctx.blobs.list(&request).await?;
            for blob in &page.blobs {
                if self.ctx.blobs.delete(&blob.name).await? {
                    deleted += 1;
                }
            }
            match page.next_marker {
                Some(marker) => request.marker = Some(marker),
                None => break,
            }
        }

        if self.ctx.blobs.delete(&key).await? {
            deleted += 1;
        }
        debug!(path = %path, deleted, "Deleted folder blobs");
        Ok(deleted > 0)
    }

    /// Create folder markers for every missing level down to `target`.
    async fn create_markers(&self, target: &StoragePath) -> Result<()> {
        let mut current = self.path.clone();
        let relative = target
            .strip_prefix(&self.path)
            .ok_or_else(|| Error::not_within_tree(format!("{} is outside {}", target, self.path)))?;

        for segment in relative.segments() {
            current = current.join(segment)?;
            let key = self.ctx.key_for(&current);
            match self.ctx.blobs.get_properties(&key).await? {
                Some(props) if props.is_folder_marker() => {}
                Some(_) => {
                    return Err(Error::InvalidInput(format!(
                        "A file exists at folder path: {}",
                        current
                    )));
                }
                None => {
                    let options = UploadOptions {
                        content_type: None,
                        metadata: BlobProperties::folder_marker_metadata(),
                    };
                    self.ctx.blobs.upload(&key, Bytes::new(), &options).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntryInfo for BlobFolderEntry {
    fn path(&self) -> &StoragePath {
        &self.path
    }

    async fn last_modified(&self) -> Result<DateTime<Utc>> {
        let key = self.ctx.key_for(&self.path);
        if !key.is_empty() {
            if let Some(props) = self.ctx.blobs.get_properties(&key).await? {
                return Ok(props.last_modified);
            }
        }
        Err(Error::Unsupported(format!(
            "Virtual folder has no modification time: {}",
            self.path
        )))
    }

    fn provider(&self) -> Arc<dyn StorageProvider> {
        Arc::new(BlobStorageProvider::from_context(self.ctx.clone()))
    }
}

#[async_trait]
impl FolderEntry for BlobFolderEntry {
    #[instrument(skip(self, args), fields(folder = %self.path))]
    async fn create_file(&self, path: &str, args: CreateFileArgs) -> Result<Arc<dyn FileEntry>> {
        let target = self.path.join(path)?;
        if target == self.path {
            return Err(Error::not_within_tree("File path is empty"));
        }

        if self.open(path).await?.is_some() {
            return Err(Error::provider(
                ErrorCode::CannotCreateFileWhenItAlreadyExists,
                format!("File already exists: {}", target),
            ));
        }

        let target = self.placement(target).await?;
        let mut data = Vec::new();
        if let Some(mut content) = args.content {
            content.read_to_end(&mut data).await.map_err(|e| {
                Error::provider_with_source(
                    ErrorCode::CannotCreateFile,
                    format!("Failed to read content for: {}", target),
                    e,
                )
            })?;
        }

        if let (Some(directories), Some(parent)) = (&self.ctx.directories, target.parent()) {
            if !parent.is_root() {
                let parent_key = self.ctx.key_for(&parent);
                if let Err(e) = directories.create_directory(&parent_key).await {
                    warn!(parent = %parent, error = %e, "Failed to pre-create parent directory");
                }
            }
        }

        let key = self.ctx.key_for(&target);
        let options = UploadOptions {
            content_type: args.content_type.or_else(|| {
                mime_guess::from_path(target.name())
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            }),
            metadata: args.properties,
        };
        let properties = self
            .ctx
            .blobs
            .upload(&key, Bytes::from(data), &options)
            .await
            .map_err(|e| {
                Error::provider_with_source(
                    ErrorCode::CannotCreateFile,
                    format!("Failed to upload: {}", target),
                    e,
                )
            })?;

        info!(path = %target, length = properties.content_length, "Created blob");
        Ok(Arc::new(BlobFileEntry::with_properties(
            self.ctx.clone(),
            target,
            properties,
        )))
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn create_folder(&self, path: &str) -> Result<Arc<dyn FolderEntry>> {
        let target = self.path.join(path)?;
        if target == self.path {
            return Ok(Arc::new(self.clone()));
        }

        if let Some(existing) = self.open(path).await? {
            return match existing {
                Entry::Folder(folder) => Ok(folder),
                Entry::File(_) => Err(Error::InvalidInput(format!(
                    "A file exists at folder path: {}",
                    target
                ))),
            };
        }

        let target = self.placement(target).await?;
        match &self.ctx.directories {
            Some(directories) => {
                directories
                    .create_directory(&self.ctx.key_for(&target))
                    .await?
            }
            None => self.create_markers(&target).await?,
        }

        debug!(path = %target, "Created folder");
        Ok(Arc::new(BlobFolderEntry::new(self.ctx.clone(), target)))
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.path.join(path)?;
        if target == self.path {
            return self.delete_self().await;
        }

        match self.open(path).await? {
            Some(Entry::File(file)) => {
                let key = self.ctx.key_for(file.path());
                if !self.ctx.blobs.delete(&key).await? {
                    return Err(Error::does_not_exist(&target));
                }
                info!(path = %file.path(), "Deleted blob");
                Ok(())
            }
            Some(Entry::Folder(folder)) => {
                if !self.delete_tree(folder.path()).await? {
                    return Err(Error::does_not_exist(&target));
                }
                info!(path = %folder.path(), "Deleted folder");
                Ok(())
            }
            None => Err(Error::does_not_exist(&target)),
        }
    }

    async fn open(&self, path: &str) -> Result<Option<Entry>> {
        let target = self.path.join(path)?;
        if target == self.path {
            return Ok(Some(Entry::Folder(Arc::new(self.clone()))));
        }

        if let Some(entry) = self.lookup(&target).await? {
            return Ok(Some(entry));
        }
        if self.ctx.casing == MatchCasing::Sensitive {
            return Ok(None);
        }

        match self.resolve_ignoring_case(&target).await? {
            Some(actual) if actual != target => self.lookup(&actual).await,
            _ => Ok(None),
        }
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn find(&self, criteria: &FindCriteria) -> Result<FindResults> {
        let source = BlobPageSource {
            ctx: self.ctx.clone(),
            prefix: self.ctx.prefix_for(&self.path),
            delimiter: (!criteria.is_recursive()).then(|| "/".to_string()),
            filter: criteria.filter()?,
            page_size: criteria.page_size,
        };
        FindResults::start(Arc::new(source)).await
    }

    fn create_provider(&self) -> Result<Arc<dyn StorageProvider>> {
        Ok(Arc::new(BlobStorageProvider::from_context(Arc::new(
            self.ctx.scoped(&self.path),
        ))))
    }

    #[instrument(skip(self), fields(folder = %self.path))]
    async fn delete_self(&self) -> Result<()> {
        if self.path.is_root() {
            return Err(Error::provider(
                ErrorCode::CannotDeleteRootFolder,
                "The root folder of a provider cannot be deleted",
            ));
        }

        if !self.delete_tree(&self.path).await? {
            return Err(Error::does_not_exist(&self.path));
        }
        info!(path = %self.path, "Deleted folder");
        Ok(())
    }
}

/// Pages of a prefix listing, filtered and mapped to entries.
struct BlobPageSource {
    ctx: Arc<BlobContext>,
    prefix: String,
    delimiter: Option<String>,
    filter: EntryFilter,
    page_size: usize,
}

#[async_trait]
impl PageSource for BlobPageSource {
    async fn fetch(&self, token: Option<&ContinuationToken>) -> Result<RawPage> {
        let (marker, carried) = match token {
            None => (None, Vec::new()),
            Some(ContinuationToken::Marker { marker, folders }) => {
                (Some(marker.clone()), folders.clone())
            }
            Some(ContinuationToken::Offset(_)) => {
                return Err(Error::InvalidInput(
                    "Blob listings resume from markers only".to_string(),
                ))
            }
        };

        let page = self
            .ctx
            .blobs
            .list(&ListRequest {
                prefix: self.prefix.clone(),
                delimiter: self.delimiter.clone(),
                marker,
                max_results: self.page_size,
            })
            .await?;

        let last_listed = page
            .blobs
            .iter()
            .map(|blob| blob.name.clone())
            .chain(page.prefixes.iter().cloned())
            .max();

        let mut entries = Vec::with_capacity(page.blobs.len() + page.prefixes.len());
        // A marker blob sorts before its prefix, possibly on an earlier page.
        let mut folders: HashSet<StoragePath> = carried.into_iter().collect();

        for prefix in &page.prefixes {
            let Some(path) = self.ctx.path_for(prefix) else {
                debug!(prefix = %prefix, "Skipping prefix with unsupported name");
                continue;
            };
            if !folders.insert(path.clone()) {
                continue;
            }
            if self.filter.matches(&path) {
                entries.push(Entry::Folder(Arc::new(BlobFolderEntry::new(self.ctx.clone(), path))));
            }
        }

        for blob in page.blobs {
            let Some(path) = self.ctx.path_for(&blob.name) else {
                debug!(key = %blob.name, "Skipping blob with unsupported name");
                continue;
            };
            if !self.filter.matches(&path) {
                continue;
            }

            if blob.properties.is_folder_marker() {
                if folders.insert(path.clone()) {
                    entries.push(Entry::Folder(Arc::new(BlobFolderEntry::new(self.ctx.clone(), path))));
                }
            } else {
                entries.push(Entry::File(Arc::new(BlobFileEntry::with_properties(
                    self.ctx.clone(),
                    path,
                    blob.properties,
                ))));
            }
        }

        entries.sort_by(|a, b| a.path().cmp(b.path()));

        let next = page.next_marker.map(|marker| {
            // Keep only folders whose prefix the listing has not passed yet.
            let mut pending: Vec<StoragePath> = folders
                .into_iter()
                .filter(|folder| match &last_listed {
                    Some(last) => self.ctx.prefix_for(folder) > *last,
                    None => true,
                })
                .collect();
            pending.sort();
            ContinuationToken::Marker {
                marker,
                folders: pending,
            }
        });

        Ok(RawPage { entries, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::client::BlobClient;
    use crate::blob::memory::MemoryBlobStore;
    use crate::entry::EntryModel;
    use crate::provider::StorageProviderExt;

    fn flat() -> (Arc<MemoryBlobStore>, BlobStorageProvider) {
        let store = Arc::new(MemoryBlobStore::new("c"));
        let provider =
            BlobStorageProvider::new(store.clone(), None, "root", MatchCasing::Sensitive).unwrap();
        (store, provider)
    }

    fn hierarchical() -> (Arc<MemoryBlobStore>, BlobStorageProvider) {
        let store = Arc::new(MemoryBlobStore::hierarchical("c"));
        let provider = BlobStorageProvider::new(
            store.clone(),
            Some(store.clone()),
            "root",
            MatchCasing::Sensitive,
        )
        .unwrap();
        (store, provider)
    }

    async fn paths(folder: &Arc<dyn FolderEntry>, criteria: &FindCriteria) -> Vec<(String, bool)> {
        folder
            .find(criteria)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|e| (e.path().as_string(), e.is_folder()))
            .collect()
    }

    #[tokio::test]
    async fn test_keys_live_under_root() {
        let (store, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file("a/b.txt", CreateFileArgs::new().with_bytes("x"))
            .await
            .unwrap();
        assert!(store.download("root/a/b.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_file_guesses_content_type_and_keeps_properties() {
        let (store, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file(
            "report.pdf",
            CreateFileArgs::new().with_property("owner", "finance"),
        )
        .await
        .unwrap();

        let props = store.get_properties("root/report.pdf").await.unwrap().unwrap();
        assert_eq!(props.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(props.metadata["owner"], "finance");
    }

    #[tokio::test]
    async fn test_upload_failure_is_wrapped() {
        let (store, provider) = flat();
        store.set_fail_uploads(true);
        let root = provider.open_root_folder().await.unwrap();
        let err = root
            .create_file("a.txt", CreateFileArgs::new())
            .await
            .err().expect("expected error");
        assert_eq!(err.code(), Some(ErrorCode::CannotCreateFile));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_flat_folders_are_prefixes_or_markers() {
        let (store, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file("virtual/x.txt", CreateFileArgs::new()).await.unwrap();
        root.create_folder("marked/inner").await.unwrap();

        assert!(store.get_properties("root/marked").await.unwrap().unwrap().is_folder_marker());
        assert!(provider.open_folder("virtual").await.unwrap().is_some());
        assert!(provider.open_folder("marked/inner").await.unwrap().is_some());

        let virtual_folder = provider.open_folder("virtual").await.unwrap().unwrap();
        assert!(matches!(
            virtual_folder.last_modified().await,
            Err(Error::Unsupported(_))
        ));
        let marked = provider.open_folder("marked").await.unwrap().unwrap();
        assert!(marked.last_modified().await.is_ok());

        let models = EntryModel::from_entries(&[
            Entry::Folder(virtual_folder),
            Entry::Folder(marked),
        ])
        .await
        .unwrap();
        assert_eq!(models[0].last_modified, None);
        assert!(models[1].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_listing_maps_prefixes_and_markers() {
        let (_, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file("a.txt", CreateFileArgs::new()).await.unwrap();
        root.create_file("sub/b.txt", CreateFileArgs::new()).await.unwrap();
        root.create_folder("empty").await.unwrap();
        root.create_folder("sub").await.unwrap();

        let current = paths(&root, &FindCriteria::ALL_IN_FOLDER).await;
        assert_eq!(
            current,
            vec![
                ("a.txt".to_string(), false),
                ("empty".to_string(), true),
                ("sub".to_string(), true),
            ]
        );

        // Without a marker, "sub" only exists as a prefix, which a recursive
        // listing never rolls up.
        let mut all = paths(&root, &FindCriteria::ALL_IN_TREE).await;
        all.sort();
        assert_eq!(
            all,
            vec![
                ("a.txt".to_string(), false),
                ("empty".to_string(), true),
                ("sub/b.txt".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_marker_folder_split_across_pages_is_listed_once() {
        let (_, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file("a.txt", CreateFileArgs::new()).await.unwrap();
        root.create_folder("sub").await.unwrap();
        root.create_file("sub/b.txt", CreateFileArgs::new()).await.unwrap();
        // Sorts between the marker "sub" and the prefix "sub/".
        root.create_file("sub-x.txt", CreateFileArgs::new()).await.unwrap();

        let expected = vec![
            ("a.txt".to_string(), false),
            ("sub".to_string(), true),
            ("sub-x.txt".to_string(), false),
        ];
        for page_size in [1, 2, 3, FindCriteria::DEFAULT_PAGE_SIZE] {
            let criteria = FindCriteria::ALL_IN_FOLDER.with_page_size(page_size);
            assert_eq!(paths(&root, &criteria).await, expected, "page size {}", page_size);
        }
    }

    #[tokio::test]
    async fn test_continuation_forgets_passed_folders() {
        let (_, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_folder("a").await.unwrap();
        root.create_file("a/1.txt", CreateFileArgs::new()).await.unwrap();
        root.create_file("b.txt", CreateFileArgs::new()).await.unwrap();
        root.create_file("c.txt", CreateFileArgs::new()).await.unwrap();

        let criteria = FindCriteria::ALL_IN_FOLDER.with_page_size(1);
        let first = root.find(&criteria).await.unwrap();
        assert_eq!(first.entries()[0].name(), "a");

        // The prefix "a/" is listed on the second page, so it is skipped there
        // and "a" is no longer carried afterwards.
        let second = first.next().await.unwrap();
        assert_eq!(second.entries()[0].name(), "b.txt");
        let rest = second.collect_all().await.unwrap();
        let names: Vec<&str> = rest.iter().map(|entry| entry.name()).collect();
        assert_eq!(names, vec!["b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_sparse_matches_skip_empty_pages() {
        let (_, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        for i in 0..12 {
            root.create_file(&format!("f{:02}.txt", i), CreateFileArgs::new())
                .await
                .unwrap();
        }
        root.create_file("zz.log", CreateFileArgs::new()).await.unwrap();

        let criteria = FindCriteria::new("*.log").with_page_size(2);
        let first = root.find(&criteria).await.unwrap();
        assert_eq!(first.entries().len(), 1);
        assert_eq!(first.entries()[0].name(), "zz.log");
        assert!(first.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_file_folder_and_missing() {
        let (store, provider) = flat();
        let root = provider.open_root_folder().await.unwrap();
        root.create_file("d/1.txt", CreateFileArgs::new()).await.unwrap();
        root.create_file("d/e/2.txt", CreateFileArgs::new()).await.unwrap();
        root.create_file("keep.txt", CreateFileArgs::new()).await.unwrap();

        root.delete("d/1.txt").await.unwrap();
        root.delete("d").await.unwrap();
        assert_eq!(store.blob_count(), 1);

        let err = root.delete("d").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DoesNotExist));
        let err = root.delete_self().await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CannotDeleteRootFolder));
    }

    #[tokio::test]
    async fn test_hierarchical_folders_use_directory_client() {
        let (store, provider) = hierarchical();
        let root = provider.open_root_folder().await.unwrap();
        root.create_folder("x/y").await.unwrap();
        assert!(crate::blob::client::DirectoryClient::directory_exists(store.as_ref(), "root/x/y")
            .await
            .unwrap());

        root.create_file("x/y/z.txt", CreateFileArgs::new()).await.unwrap();
        let current = paths(&root, &FindCriteria::ALL_IN_FOLDER).await;
        assert_eq!(current, vec![("x".to_string(), true)]);

        provider.rename("x/y", "moved").await.unwrap();
        assert!(provider.open_file("moved/z.txt").await.unwrap().is_some());
        assert!(provider.open("x/y").await.unwrap().is_none());

        root.delete("moved").await.unwrap();
        assert!(provider.open("moved").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_needs_hierarchy() {
        let (_, provider) = flat();
        assert!(matches!(
            provider.rename("a", "b").await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_case_insensitive_open() {
        let store = Arc::new(MemoryBlobStore::new("c"));
        let insensitive =
            BlobStorageProvider::new(store.clone(), None, "", MatchCasing::Insensitive).unwrap();
        let sensitive = BlobStorageProvider::new(store, None, "", MatchCasing::Sensitive).unwrap();

        insensitive
            .open_root_folder()
            .await
            .unwrap()
            .create_file("Dir/Foo.txt", CreateFileArgs::new())
            .await
            .unwrap();

        let found = insensitive.open("dir/foo.TXT").await.unwrap().unwrap();
        assert_eq!(found.path().as_string(), "Dir/Foo.txt");
        assert!(sensitive.open("dir/foo.TXT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_case_insensitive_create_uses_stored_parent_names() {
        let store = Arc::new(MemoryBlobStore::new("c"));
        let provider =
            BlobStorageProvider::new(store.clone(), None, "", MatchCasing::Insensitive).unwrap();
        let root = provider.open_root_folder().await.unwrap();

        root.create_folder("Dir").await.unwrap();
        root.create_file("dir/x.txt", CreateFileArgs::new()).await.unwrap();
        let folder = root.create_folder("DIR/Sub").await.unwrap();

        assert_eq!(folder.path().as_string(), "Dir/Sub");
        assert!(store.get_properties("Dir/x.txt").await.unwrap().is_some());
        assert!(store.get_properties("Dir/Sub").await.unwrap().unwrap().is_folder_marker());
        assert!(store.get_properties("dir/x.txt").await.unwrap().is_none());
        assert!(store.get_properties("DIR").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoped_provider_shares_store() {
        let (store, provider) = flat();
        let folder = provider.open_or_create_folder("tenant").await.unwrap();
        let scoped = folder.create_provider().unwrap();
        scoped
            .open_root_folder()
            .await
            .unwrap()
            .create_file("a.txt", CreateFileArgs::new())
            .await
            .unwrap();
        assert!(store.download("root/tenant/a.txt").await.unwrap().is_some());
    }
}
