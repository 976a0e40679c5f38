//! Storage provider abstraction for UniStore.
//!
//! This crate provides one set of contracts for folders, files, search and
//! external URLs, implemented by a local disk backend and a cloud blob
//! backend (flat or hierarchical), plus a provider registry for building
//! providers from configuration.
//!
//! # Design Principles
//! - Provider isolation: callers only see the entry traits
//! - Async operations: All I/O operations are async
//! - Streaming support: content moves through async streams
//! - Unified error semantics: failures carry a closed error code

pub mod blob;
pub mod config;
pub mod entry;
pub mod find;
pub mod local;
pub mod provider;
pub mod registry;
pub mod settings;

pub use blob::{BlobClient, BlobStorageProvider, DirectoryClient, MemoryBlobStore};
pub use config::{
    BlobConfig, ConnectionString, ConnectionStringResolver, EnvConnectionStringResolver,
    LocalConfig, MemoryBlobConfig, ProviderSpec,
};
pub use entry::EntryModel;
pub use find::{ContinuationToken, FindCriteria, FindResults, MatchTarget, NestingOption};
pub use local::{ChangeToken, LocalStorageProvider};
pub use provider::{
    Entry, EntryInfo, FileEntry, FolderEntry, ReadStream, StorageProvider, StorageProviderExt,
    UserPropertyStore, WebAccess, WriteStream,
};
pub use registry::{create_default_registry, create_registry, ProviderFactory, ProviderRegistry};
pub use settings::{
    ContentTypePolicy, CreateFileArgs, Expiry, ExternalAccessSettings, ExternalAccessType,
};
