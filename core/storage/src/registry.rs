//! Provider registry for dynamic provider resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use unistore_common::{Error, Result};

use crate::config::{
    parse_config, BlobConfig, ConnectionStringResolver, EnvConnectionStringResolver, LocalConfig,
    MemoryBlobConfig, ProviderSpec,
};
use crate::provider::StorageProvider;

/// Factory function type for creating providers.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Registry for storage provider factories.
///
/// Allows dynamic registration and resolution of storage providers
/// by kind name and configuration.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - `InvalidInput` if `name` is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a provider by name and configuration.
    ///
    /// # Errors
    /// - `InvalidInput` if no factory is registered under `name`
    /// - Whatever the factory reports for an invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn StorageProvider>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::InvalidInput(format!("Provider '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Resolve a provider described by a config file entry.
    pub fn resolve_spec(&self, spec: &ProviderSpec) -> Result<Arc<dyn StorageProvider>> {
        self.resolve(&spec.provider, spec.config.clone())
    }

    /// Get list of registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers, resolving connection
/// names from the environment.
pub fn create_default_registry() -> ProviderRegistry {
    create_registry(Arc::new(EnvConnectionStringResolver::default()))
}

/// Create a registry with the built-in providers.
///
/// - `local`: [`LocalConfig`]
/// - `blob`: [`BlobConfig`], connection names looked up through `resolver`
/// - `memory-blob`: [`MemoryBlobConfig`], a fresh in-process store per resolve
pub fn create_registry(resolver: Arc<dyn ConnectionStringResolver>) -> ProviderRegistry {
    let mut factories: HashMap<String, ProviderFactory> = HashMap::new();

    factories.insert(
        "local".to_string(),
        Box::new(|config: Value| -> Result<Arc<dyn StorageProvider>> {
            let config: LocalConfig = parse_config(config)?;
            Ok(Arc::new(config.open()?))
        }),
    );

    factories.insert(
        "blob".to_string(),
        Box::new(move |config: Value| -> Result<Arc<dyn StorageProvider>> {
            let config: BlobConfig = parse_config(config)?;
            Ok(Arc::new(config.connect(resolver.as_ref())?))
        }),
    );

    factories.insert(
        "memory-blob".to_string(),
        Box::new(|config: Value| -> Result<Arc<dyn StorageProvider>> {
            let config: MemoryBlobConfig = parse_config(config)?;
            Ok(Arc::new(config.open()?))
        }),
    );

    ProviderRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConnectionStrings;
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_factory() -> ProviderFactory {
        Box::new(|_: Value| -> Result<Arc<dyn StorageProvider>> {
            Ok(Arc::new(MemoryBlobConfig::default().open()?))
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ProviderRegistry::new();
        registry.register("test", memory_factory()).unwrap();

        let provider = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(provider.name(), "blob");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry.register("test", memory_factory()).unwrap();

        let result = registry.register("test", memory_factory());
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.resolve("unknown", Value::Null);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_providers() {
        let registry = create_default_registry();
        assert_eq!(registry.providers(), vec!["blob", "local", "memory-blob"]);
        assert!(registry.has_provider("local"));
        assert!(!registry.has_provider("memory"));
    }

    #[test]
    fn test_resolve_local() {
        let temp = TempDir::new().unwrap();
        let registry = create_default_registry();
        let spec: ProviderSpec = serde_json::from_value(json!({
            "provider": "local",
            "config": { "root": temp.path() }
        }))
        .unwrap();

        let provider = registry.resolve_spec(&spec).unwrap();
        assert_eq!(provider.name(), "local");

        assert!(registry.resolve("local", json!({})).is_err());
        assert!(registry.resolve("local", json!({ "root": 5 })).is_err());
    }

    #[test]
    fn test_resolve_blob_by_connection_name() {
        let resolver = StaticConnectionStrings::default()
            .with("main", "AccountName=acct;AccountKey=a2V5");
        let registry = create_registry(Arc::new(resolver));

        let provider = registry
            .resolve(
                "blob",
                json!({ "connection_name": "main", "container": "docs", "hierarchical": true }),
            )
            .unwrap();
        assert_eq!(provider.name(), "blob");

        let unknown = registry.resolve("blob", json!({ "connection_name": "other", "container": "docs" }));
        assert!(unknown.is_err());
    }

    #[tokio::test]
    async fn test_memory_blob_instances_are_isolated() {
        use crate::provider::StorageProviderExt;
        use crate::settings::CreateFileArgs;

        let registry = create_default_registry();
        let a = registry.resolve("memory-blob", Value::Null).unwrap();
        let b = registry.resolve("memory-blob", json!({ "root": "x" })).unwrap();

        a.open_root_folder()
            .await
            .unwrap()
            .create_file("f.txt", CreateFileArgs::new().with_bytes("1"))
            .await
            .unwrap();
        assert!(a.open_file("f.txt").await.unwrap().is_some());
        assert!(b.open_file("f.txt").await.unwrap().is_none());
    }
}
