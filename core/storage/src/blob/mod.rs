//! Cloud blob storage provider.
//!
//! Files are blobs in one container and folders are key prefixes below a
//! root key. Accounts with a hierarchical namespace also get real
//! directories through a [`DirectoryClient`].
//!
//! Writes are staged in a local temp file and uploaded when the stream is
//! closed.

pub mod azure;
pub mod client;
mod file;
mod folder;
pub mod memory;
mod provider;
pub mod sas;
mod staging;

pub use client::{
    BlobClient, BlobItem, BlobProperties, DirectoryClient, ListPage, ListRequest, UploadOptions,
    UserDelegationKey, FOLDER_MARKER_KEY,
};
pub use file::BlobFileEntry;
pub use folder::BlobFolderEntry;
pub use memory::MemoryBlobStore;
pub use provider::BlobStorageProvider;
pub use sas::{AccountKey, BlobSasRequest, SasCredential};
pub use staging::StagedWriteStream;
