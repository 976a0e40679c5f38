//! Provider configuration records.
//!
//! Every record deserializes from JSON with defaults for missing fields, so
//! the registry and the CLI can build providers from loose configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use unistore_common::{Error, MatchCasing, Result};

use crate::blob::azure::{AzureBlobClient, AzureCredential, AzureDataLakeClient, EnvTokenSource};
use crate::blob::{AccountKey, BlobClient, BlobStorageProvider, DirectoryClient, MemoryBlobStore};
use crate::local::LocalStorageProvider;

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const DEFAULT_PROTOCOL: &str = "https";
const DEVELOPMENT_ACCOUNT: &str = "devstoreaccount1";
const DEVELOPMENT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEVELOPMENT_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

fn casing(case_sensitive: bool) -> MatchCasing {
    if case_sensitive {
        MatchCasing::Sensitive
    } else {
        MatchCasing::Insensitive
    }
}

/// Parse a configuration value; `null` means all defaults.
pub(crate) fn parse_config<T: DeserializeOwned + Default>(config: Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(config)?)
}

/// Provider kind plus its configuration, as stored in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

/// Configuration of the local disk provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub root: PathBuf,
    pub case_sensitive: bool,
    /// Create the root directory when it is missing.
    pub create_root: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            case_sensitive: true,
            create_root: true,
        }
    }
}

impl LocalConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn open(&self) -> Result<LocalStorageProvider> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidInput(
                "Local provider requires 'root' path".to_string(),
            ));
        }
        if !self.create_root && !self.root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Root directory does not exist: {}",
                self.root.display()
            )));
        }
        LocalStorageProvider::with_casing(&self.root, casing(self.case_sensitive))
    }
}

/// Configuration of the blob provider backed by a storage account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Inline connection string.
    pub connection_string: Option<String>,
    /// Logical connection name, looked up through a [`ConnectionStringResolver`].
    pub connection_name: Option<String>,
    pub container: String,
    /// Key prefix all paths live under.
    pub root: String,
    /// Use directory operations of a hierarchical namespace.
    pub hierarchical: bool,
    pub case_sensitive: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            connection_name: None,
            container: String::new(),
            root: String::new(),
            hierarchical: false,
            case_sensitive: true,
        }
    }
}

impl fmt::Debug for BlobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .field("connection_name", &self.connection_name)
            .field("container", &self.container)
            .field("root", &self.root)
            .field("hierarchical", &self.hierarchical)
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

impl BlobConfig {
    /// The connection string, inline or resolved by name.
    pub fn connection_string(&self, resolver: &dyn ConnectionStringResolver) -> Result<String> {
        match (&self.connection_string, &self.connection_name) {
            (Some(inline), _) => Ok(inline.clone()),
            (None, Some(name)) => resolver.resolve(name),
            (None, None) => Err(Error::InvalidInput(
                "Blob provider requires 'connection_string' or 'connection_name'".to_string(),
            )),
        }
    }

    /// Build a provider talking to the storage account.
    pub fn connect(&self, resolver: &dyn ConnectionStringResolver) -> Result<BlobStorageProvider> {
        if self.container.is_empty() {
            return Err(Error::InvalidInput(
                "Blob provider requires 'container'".to_string(),
            ));
        }

        let connection = ConnectionString::parse(&self.connection_string(resolver)?)?;
        let endpoint = connection.blob_endpoint()?;
        let credential = connection.credential()?;

        let blobs: Arc<dyn BlobClient> = Arc::new(AzureBlobClient::new(
            endpoint.clone(),
            connection.account_name.clone(),
            self.container.clone(),
            credential.clone(),
        )?);
        let directories: Option<Arc<dyn DirectoryClient>> = if self.hierarchical {
            Some(Arc::new(AzureDataLakeClient::new(
                &endpoint,
                self.container.clone(),
                credential,
            )?))
        } else {
            None
        };

        debug!(endpoint = %endpoint, container = %self.container, "Connecting blob provider");
        BlobStorageProvider::new(blobs, directories, &self.root, casing(self.case_sensitive))
    }
}

/// Configuration of a blob provider over a fresh in-process store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBlobConfig {
    pub container: String,
    pub root: String,
    pub hierarchical: bool,
    pub case_sensitive: bool,
}

impl Default for MemoryBlobConfig {
    fn default() -> Self {
        Self {
            container: "memory".to_string(),
            root: String::new(),
            hierarchical: false,
            case_sensitive: true,
        }
    }
}

impl MemoryBlobConfig {
    pub fn open(&self) -> Result<BlobStorageProvider> {
        let casing = casing(self.case_sensitive);
        if self.hierarchical {
            let store = Arc::new(MemoryBlobStore::hierarchical(self.container.clone()));
            let directories: Arc<dyn DirectoryClient> = store.clone();
            BlobStorageProvider::new(store, Some(directories), &self.root, casing)
        } else {
            let store = Arc::new(MemoryBlobStore::new(self.container.clone()));
            BlobStorageProvider::new(store, None, &self.root, casing)
        }
    }
}

/// Parsed storage account connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: Option<String>,
    pub endpoint_suffix: Option<String>,
    pub blob_endpoint: Option<String>,
    pub protocol: Option<String>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("blob_endpoint", &self.blob_endpoint)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl ConnectionString {
    /// Parse `Name=Value;Name=Value` pairs. Names are case-insensitive.
    ///
    /// # Errors
    /// - `InvalidInput` for a malformed pair or a missing account name
    pub fn parse(text: &str) -> Result<Self> {
        let mut pairs = HashMap::new();
        for part in text.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                Error::InvalidInput(format!("Malformed connection string segment: {:?}", part))
            })?;
            pairs.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
        {
            return Ok(Self::development());
        }

        let account_name = pairs.remove("accountname").ok_or_else(|| {
            Error::InvalidInput("Connection string has no AccountName".to_string())
        })?;

        Ok(Self {
            account_name,
            account_key: pairs.remove("accountkey"),
            endpoint_suffix: pairs.remove("endpointsuffix"),
            blob_endpoint: pairs.remove("blobendpoint"),
            protocol: pairs.remove("defaultendpointsprotocol"),
        })
    }

    /// The local storage emulator account.
    pub fn development() -> Self {
        Self {
            account_name: DEVELOPMENT_ACCOUNT.to_string(),
            account_key: Some(DEVELOPMENT_KEY.to_string()),
            endpoint_suffix: None,
            blob_endpoint: Some(DEVELOPMENT_ENDPOINT.to_string()),
            protocol: Some("http".to_string()),
        }
    }

    pub fn blob_endpoint(&self) -> Result<Url> {
        let endpoint = match &self.blob_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}://{}.blob.{}",
                self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL),
                self.account_name,
                self.endpoint_suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            ),
        };
        Url::parse(&endpoint)
            .map_err(|e| Error::InvalidInput(format!("Invalid blob endpoint {:?}: {}", endpoint, e)))
    }

    /// Shared key when the string carries one, bearer tokens otherwise.
    pub fn credential(&self) -> Result<AzureCredential> {
        match &self.account_key {
            Some(key) => Ok(AzureCredential::SharedKey {
                account: self.account_name.clone(),
                key: AccountKey::from_base64(key)?,
            }),
            None => Ok(AzureCredential::Token(Arc::new(EnvTokenSource::default()))),
        }
    }
}

/// Looks up connection strings by logical name.
pub trait ConnectionStringResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String>;
}

/// Resolves `name` from the `UNISTORE_CONNECTION_<NAME>` environment variable.
#[derive(Debug, Clone)]
pub struct EnvConnectionStringResolver {
    prefix: String,
}

impl EnvConnectionStringResolver {
    pub const DEFAULT_PREFIX: &'static str = "UNISTORE_CONNECTION_";

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

impl Default for EnvConnectionStringResolver {
    fn default() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }
}

impl ConnectionStringResolver for EnvConnectionStringResolver {
    fn resolve(&self, name: &str) -> Result<String> {
        let variable = self.variable(name);
        std::env::var(&variable).map_err(|_| {
            Error::InvalidInput(format!(
                "Connection '{}' is not configured (set ${})",
                name, variable
            ))
        })
    }
}

/// Fixed name to connection string table.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionStrings(HashMap<String, String>);

impl StaticConnectionStrings {
    pub fn with(mut self, name: impl Into<String>, connection: impl Into<String>) -> Self {
        self.0.insert(name.into(), connection.into());
        self
    }
}

impl ConnectionStringResolver for StaticConnectionStrings {
    fn resolve(&self, name: &str) -> Result<String> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("Connection '{}' is not configured", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StorageProvider;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_connection_string() {
        let connection = ConnectionString::parse(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5;EndpointSuffix=core.windows.net",
        )
        .unwrap();

        assert_eq!(connection.account_name, "acct");
        assert_eq!(connection.account_key.as_deref(), Some("a2V5"));
        assert_eq!(
            connection.blob_endpoint().unwrap().as_str(),
            "https://acct.blob.core.windows.net/"
        );
        assert!(connection.credential().unwrap().account_key().is_some());
        assert!(!format!("{:?}", connection).contains("a2V5"));
    }

    #[test]
    fn test_explicit_endpoint_and_token_credential() {
        let connection =
            ConnectionString::parse("AccountName=acct;BlobEndpoint=http://localhost:10000/acct;")
                .unwrap();
        assert_eq!(
            connection.blob_endpoint().unwrap().as_str(),
            "http://localhost:10000/acct"
        );
        assert!(connection.credential().unwrap().account_key().is_none());
    }

    #[test]
    fn test_development_storage() {
        let connection = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(connection.account_name, DEVELOPMENT_ACCOUNT);
        assert!(connection.credential().is_ok());
    }

    #[test]
    fn test_malformed_connection_string() {
        assert!(ConnectionString::parse("AccountName").is_err());
        assert!(ConnectionString::parse("AccountKey=abc").is_err());
    }

    #[test]
    fn test_connection_name_resolution() {
        let resolver = StaticConnectionStrings::default().with("main", "AccountName=acct");
        let config = BlobConfig {
            connection_name: Some("main".to_string()),
            ..Default::default()
        };
        assert_eq!(config.connection_string(&resolver).unwrap(), "AccountName=acct");
        assert!(BlobConfig::default().connection_string(&resolver).is_err());
    }

    #[test]
    fn test_env_variable_name() {
        let resolver = EnvConnectionStringResolver::default();
        assert_eq!(resolver.variable("docs-prod"), "UNISTORE_CONNECTION_DOCS_PROD");
    }

    #[test]
    fn test_connect_builds_azure_provider() {
        let config: BlobConfig = serde_json::from_value(json!({
            "connection_string": "AccountName=acct;AccountKey=a2V5",
            "container": "docs",
            "root": "/tenant/a/",
        }))
        .unwrap();

        let provider = config.connect(&EnvConnectionStringResolver::default()).unwrap();
        assert_eq!(provider.root_key(), "tenant/a");
        assert_eq!(provider.match_casing(), MatchCasing::Sensitive);

        let missing = BlobConfig {
            container: String::new(),
            ..config
        };
        assert!(missing.connect(&EnvConnectionStringResolver::default()).is_err());
    }

    #[test]
    fn test_local_config() {
        let temp = TempDir::new().unwrap();
        let config: LocalConfig = serde_json::from_value(json!({
            "root": temp.path().join("data"),
            "case_sensitive": false,
        }))
        .unwrap();
        assert!(config.create_root);

        let provider = config.open().unwrap();
        assert!(provider.root().is_dir());
        assert_eq!(provider.match_casing(), MatchCasing::Insensitive);

        let strict = LocalConfig {
            root: temp.path().join("missing"),
            create_root: false,
            ..Default::default()
        };
        assert!(strict.open().is_err());
        assert!(LocalConfig::default().open().is_err());
    }

    #[test]
    fn test_null_config_uses_defaults() {
        let config: MemoryBlobConfig = parse_config(Value::Null).unwrap();
        assert_eq!(config.container, "memory");
    }
}
