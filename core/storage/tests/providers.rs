use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use unistore_common::{ErrorCode, MatchCasing};
use unistore_storage::*;

/// A provider plus whatever keeps its storage alive.
struct Fixture {
    provider: Arc<dyn StorageProvider>,
    _temp: Option<TempDir>,
}

fn local(casing: MatchCasing) -> Fixture {
    let temp = TempDir::new().unwrap();
    let provider = LocalStorageProvider::with_casing(temp.path().join("data"), casing).unwrap();
    Fixture {
        provider: Arc::new(provider),
        _temp: Some(temp),
    }
}

fn blob(casing: MatchCasing) -> Fixture {
    let store = Arc::new(MemoryBlobStore::new("test"));
    let provider = BlobStorageProvider::new(store, None, "tenant/data", casing).unwrap();
    Fixture {
        provider: Arc::new(provider),
        _temp: None,
    }
}

fn hierarchical_blob(casing: MatchCasing) -> Fixture {
    let store = Arc::new(MemoryBlobStore::hierarchical("test"));
    let provider = BlobStorageProvider::new(store.clone(), Some(store), "tenant", casing).unwrap();
    Fixture {
        provider: Arc::new(provider),
        _temp: None,
    }
}

fn all(casing: MatchCasing) -> Vec<Fixture> {
    vec![local(casing), blob(casing), hierarchical_blob(casing)]
}

async fn create(provider: &dyn StorageProvider, path: &str, data: &[u8]) -> Arc<dyn FileEntry> {
    provider
        .open_root_folder()
        .await
        .unwrap()
        .create_file(path, CreateFileArgs::new().with_bytes(data.to_vec()))
        .await
        .unwrap()
}

async fn read(provider: &dyn StorageProvider, path: &str) -> Vec<u8> {
    let mut data = Vec::new();
    provider
        .open_file_read_stream(path)
        .await
        .unwrap()
        .read_to_end(&mut data)
        .await
        .unwrap();
    data
}

#[tokio::test]
async fn test_round_trip_sizes() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        for (i, size) in [0usize, 1, 64 * 1024, 3 * 1024 * 1024].into_iter().enumerate() {
            let data: Vec<u8> = (0..size).map(|n| (n % 251) as u8).collect();
            let path = format!("round/{}.bin", i);

            let file = create(provider, &path, &data).await;
            assert_eq!(file.length().await.unwrap(), size as i64, "{}", provider.name());
            assert_eq!(read(provider, &path).await, data);
        }
    }
}

#[tokio::test]
async fn test_duplicate_create_keeps_content() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "docs/a.txt", b"first").await;

        let err = provider
            .open_root_folder()
            .await
            .unwrap()
            .create_file("docs/a.txt", CreateFileArgs::new().with_bytes("second"))
            .await
            .err()
            .unwrap();

        assert_eq!(err.code(), Some(ErrorCode::CannotCreateFileWhenItAlreadyExists));
        assert_eq!(read(provider, "docs/a.txt").await, b"first");
    }
}

#[tokio::test]
async fn test_pagination_returns_each_entry_once() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        for i in 0..23 {
            create(provider, &format!("many/f{:02}.txt", i), b"x").await;
        }
        for name in ["d0", "f05", "zz"] {
            provider
                .open_or_create_folder(&format!("many/{}", name))
                .await
                .unwrap();
        }
        create(provider, "many/f05/inner.txt", b"i").await;
        create(provider, "many/zz/inner.txt", b"i").await;

        let folder = provider.open_folder("many").await.unwrap().unwrap();
        for page_size in [1, 4] {
            let criteria = FindCriteria::new("*").with_page_size(page_size);

            let mut seen = HashSet::new();
            let mut pages = 0;
            let mut page = folder.find(&criteria).await.unwrap();
            while !page.is_empty() {
                assert!(page.entries().len() <= page_size);
                for entry in page.entries() {
                    assert!(
                        seen.insert(entry.path().as_string()),
                        "{} listed {} twice at page size {}",
                        provider.name(),
                        entry.path(),
                        page_size
                    );
                }
                pages += 1;
                page = page.next().await.unwrap();
            }

            assert_eq!(seen.len(), 26, "{}", provider.name());
            assert!(seen.contains("many/f05"));
            assert!(pages >= 26 / page_size);
            assert!(!page.has_more());
            assert!(page.next().await.unwrap().is_empty());
        }
    }
}

#[tokio::test]
async fn test_nesting_scope() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "a/b/c.txt", b"c").await;
        create(provider, "a/top.txt", b"t").await;

        let folder = provider.open_folder("a").await.unwrap().unwrap();

        let current: Vec<String> = folder
            .find(&FindCriteria::new("*.txt"))
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.path().as_string())
            .collect();
        assert_eq!(current, vec!["a/top.txt"], "{}", provider.name());

        let recursive: HashSet<String> = folder
            .find(&FindCriteria::new("*.txt").recursive())
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.path().as_string())
            .collect();
        assert!(recursive.contains("a/b/c.txt"));
        assert!(recursive.contains("a/top.txt"));
    }
}

#[tokio::test]
async fn test_case_insensitive_open() {
    for fixture in all(MatchCasing::Insensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "Dir/Foo.txt", b"x").await;

        let file = provider.open_file("dir/foo.TXT").await.unwrap();
        assert!(file.is_some(), "{}", provider.name());
    }

    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "Dir/Foo.txt", b"x").await;

        assert!(provider.open_file("dir/foo.TXT").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_case_insensitive_create_keeps_existing_parent() {
    for fixture in all(MatchCasing::Insensitive) {
        let provider = fixture.provider.as_ref();
        let root = provider.open_root_folder().await.unwrap();
        root.create_folder("Dir").await.unwrap();

        let file = root
            .create_file("dir/x.txt", CreateFileArgs::new().with_bytes("x"))
            .await
            .unwrap();
        assert_eq!(file.path().as_string(), "Dir/x.txt", "{}", provider.name());

        let names: Vec<String> = root
            .find(&FindCriteria::ALL_IN_FOLDER)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.name().to_string())
            .collect();
        assert_eq!(names, vec!["Dir"], "{}", provider.name());
    }
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();

        let err = provider.delete("/").await.err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::CannotDeleteRootFolder));

        let root = provider.open_root_folder().await.unwrap();
        let err = root.delete_self().await.err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::CannotDeleteRootFolder));
    }
}

#[tokio::test]
async fn test_paths_outside_tree_are_rejected() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        let root = provider.open_root_folder().await.unwrap();

        for bad in ["../escape.txt", "a/./b.txt", "a//b.txt"] {
            let err = root
                .create_file(bad, CreateFileArgs::new())
                .await
                .err()
                .unwrap();
            assert_eq!(err.code(), Some(ErrorCode::NotWithinTree), "{}", bad);
        }
        assert!(provider.open("a/../b").await.is_err());
    }
}

#[tokio::test]
async fn test_delete_folder_tree() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "tree/x/1.txt", b"1").await;
        create(provider, "tree/2.txt", b"2").await;
        create(provider, "keep.txt", b"k").await;

        provider.delete("tree").await.unwrap();
        assert!(provider.open("tree").await.unwrap().is_none(), "{}", provider.name());
        assert!(provider.open("tree/x/1.txt").await.unwrap().is_none());
        assert!(provider.open_file("keep.txt").await.unwrap().is_some());

        let err = provider.delete("tree").await.err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::DoesNotExist));
    }
}

#[tokio::test]
async fn test_scoped_provider_sees_relative_paths() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "scope/inner/file.txt", b"scoped").await;

        let folder = provider.open_folder("scope").await.unwrap().unwrap();
        let scoped = folder.create_provider().unwrap();

        assert_eq!(read(scoped.as_ref(), "inner/file.txt").await, b"scoped");
        let err = scoped.delete("").await.err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::CannotDeleteRootFolder));
    }
}

#[tokio::test]
async fn test_write_stream_replaces_content() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        let file = create(provider, "edit.txt", b"hello, world").await;

        let mut stream = file.open_write().await.unwrap();
        stream.write_all(b"HELLO").await.unwrap();
        stream.set_len(5).await.unwrap();
        stream.close().await.unwrap();

        assert_eq!(read(provider, "edit.txt").await, b"HELLO", "{}", provider.name());
    }
}

#[tokio::test]
async fn test_staged_write_invisible_until_close() {
    let registry = create_default_registry();
    let provider = registry.resolve("memory-blob", json!({ "root": "r" })).unwrap();
    let file = create(provider.as_ref(), "doc.txt", b"old").await;

    let mut stream = file.open_write().await.unwrap();
    stream.write_all(b"new").await.unwrap();
    assert_eq!(read(provider.as_ref(), "doc.txt").await, b"old");

    stream.close().await.unwrap();
    assert_eq!(read(provider.as_ref(), "doc.txt").await, b"new");
}

#[tokio::test]
async fn test_external_urls() {
    let local = local(MatchCasing::Sensitive);
    let file = create(local.provider.as_ref(), "a.txt", b"x").await;
    assert!(file.web_access().is_none());
    assert!(file.property_store().is_none());

    let store = Arc::new(MemoryBlobStore::new("c"));
    let provider = BlobStorageProvider::new(store.clone(), None, "", MatchCasing::Sensitive).unwrap();
    let a = create(&provider, "a.txt", b"x").await;
    let b = create(&provider, "b.txt", b"y").await;

    let settings = ExternalAccessSettings::default();
    let url = a.web_access().unwrap().external_url(&settings).await.unwrap();
    b.web_access().unwrap().external_url(&settings).await.unwrap();

    let params: Vec<String> = url.query_pairs().map(|(name, _)| name.into_owned()).collect();
    for name in ["sv", "se", "sr", "sp", "sig", "skoid"] {
        assert!(params.iter().any(|param| param == name), "missing {}", name);
    }
    assert_eq!(store.delegation_key_fetches(), 1);
}

#[tokio::test]
async fn test_entry_models_from_find() {
    for fixture in all(MatchCasing::Sensitive) {
        let provider = fixture.provider.as_ref();
        create(provider, "m/file.json", b"{}").await;
        provider.open_or_create_folder("m/sub").await.unwrap();

        let root = provider.open_folder("m").await.unwrap().unwrap();
        let entries = root
            .find(&FindCriteria::ALL_IN_FOLDER)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        let models = EntryModel::from_entries(&entries).await.unwrap();

        let file = models.iter().find(|model| model.name == "file.json").unwrap();
        assert!(!file.is_folder);
        assert_eq!(file.length, Some(2));
        assert!(file.last_modified.is_some());

        let sub = models.iter().find(|model| model.name == "sub").unwrap();
        assert!(sub.is_folder, "{}", provider.name());
        assert_eq!(sub.length, None);
    }
}
