use dashmap::DashMap;
use quarry_cache::CacheBackends;
use quarry_core::QuarryConfig;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::{AdapterFactory, StorageAdapter};
use crate::condition::Condition;
use crate::error::{Result, StorageError};
use crate::memory::memory_factory;
use crate::metadata::EntityDef;
use crate::plugin::PluginFactory;
use crate::plugins::cache;
use crate::schema::Schema;
use crate::value::{Id, Props};

/// What an adapter is being selected for, handed to domain dispatchers.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchArg {
    None,
    Id(Id),
    Entity { type_name: String, props: Props },
    Condition(Condition),
}

/// Routes a domain to one of its nodes: returns the suffix appended to the
/// domain name (`"blog"` + `"shard2"` → `"blog.shard2"`), or `None` for the
/// domain itself.
pub type Dispatcher = Arc<dyn Fn(&str, &DispatchArg) -> Option<String> + Send + Sync>;

/// Process-wide storage services shared by every [`Repository`].
///
/// Owns the schema, the adapter factories and the adapters built from them.
/// Adapters are constructed once per resolved domain key and reused.
///
/// [`Repository`]: crate::Repository
pub struct Storage {
    schema: Arc<Schema>,
    config: Arc<QuarryConfig>,
    factories: DashMap<String, AdapterFactory>,
    dispatchers: DashMap<String, Dispatcher>,
    adapters: DashMap<String, Arc<dyn StorageAdapter>>,
    cache_backends: CacheBackends,
}

impl Storage {
    /// Storage over `config`, with the `memory` adapter and the `cache`
    /// plugin registered.
    pub fn new(config: QuarryConfig) -> Result<Self> {
        let config = Arc::new(config);
        let storage = Self {
            schema: Arc::new(Schema::new(config.clone())),
            config,
            factories: DashMap::new(),
            dispatchers: DashMap::new(),
            adapters: DashMap::new(),
            cache_backends: CacheBackends::new(),
        };
        storage.register_adapter_factory("memory", memory_factory());
        storage.register_plugin("cache", cache::factory(storage.cache_backends.clone()));
        Ok(storage)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    /// Stores used by the record cache plugin, by cache domain.
    pub fn cache_backends(&self) -> &CacheBackends {
        &self.cache_backends
    }

    pub fn define(&self, def: EntityDef) {
        self.schema.define(def);
    }

    pub fn register_plugin(&self, name: impl Into<String>, factory: PluginFactory) {
        self.schema.register_plugin(name, factory);
    }

    /// Make an adapter kind available to `storage.domains.<key>.adapter`.
    pub fn register_adapter_factory(&self, name: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Use `adapter` for the resolved domain key `key`, bypassing config.
    pub fn register_adapter(&self, key: impl Into<String>, adapter: Arc<dyn StorageAdapter>) {
        self.adapters.insert(key.into(), adapter);
    }

    pub fn set_dispatcher(&self, domain: impl Into<String>, dispatcher: Dispatcher) {
        self.dispatchers.insert(domain.into(), dispatcher);
    }

    pub fn remove_dispatcher(&self, domain: &str) -> bool {
        self.dispatchers.remove(domain).is_some()
    }

    /// `storage.default_domain`, `"default"` when unset.
    pub fn default_domain(&self) -> String {
        self.config
            .get_or("storage.default_domain", "default".to_string())
    }

    /// Resolve the domain key for `domain` and `arg`.
    pub fn resolve_domain(&self, domain: Option<&str>, arg: &DispatchArg) -> String {
        let domain = domain.map_or_else(|| self.default_domain(), str::to_string);
        let suffix = self
            .dispatchers
            .get(&domain)
            .map(|d| d.value().clone())
            .and_then(|dispatch| dispatch(&domain, arg));
        match suffix {
            Some(suffix) if !suffix.is_empty() => format!("{domain}.{suffix}"),
            _ => domain,
        }
    }

    /// The adapter serving `domain` (the default domain when `None`) for
    /// `arg`, built from config on first use.
    pub fn select_adapter(
        &self,
        domain: Option<&str>,
        arg: &DispatchArg,
    ) -> Result<Arc<dyn StorageAdapter>> {
        let key = self.resolve_domain(domain, arg);
        if let Some(adapter) = self.adapters.get(&key) {
            return Ok(adapter.value().clone());
        }

        let mut settings = QuarryConfig::empty();
        settings.import(self.config.section(&format!("storage.domains.{key}")));
        let name: String = settings
            .get_opt("adapter")?
            .ok_or_else(|| StorageError::DomainNotConfigured(key.clone()))?;
        let factory = self
            .factories
            .get(&name)
            .map(|f| f.value().clone())
            .ok_or_else(|| StorageError::UnknownAdapter(name.clone()))?;
        let adapter = factory(&key, &settings)?;
        debug!(domain = %key, adapter = %name, "Created storage adapter");

        Ok(self.adapters.entry(key).or_insert(adapter).value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;

    #[test]
    fn test_adapters_are_built_once_per_domain() {
        let mut config = QuarryConfig::empty();
        config.set("storage.domains.default.adapter", "memory");
        let storage = Storage::new(config).unwrap();

        let a = storage.select_adapter(None, &DispatchArg::None).unwrap();
        let b = storage.select_adapter(Some("default"), &DispatchArg::None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unconfigured_domain_and_unknown_adapter() {
        let mut config = QuarryConfig::empty();
        config.set("storage.domains.legacy.adapter", "oracle");
        let storage = Storage::new(config).unwrap();

        assert!(matches!(
            storage.select_adapter(Some("blog"), &DispatchArg::None),
            Err(StorageError::DomainNotConfigured(key)) if key == "blog"
        ));
        assert!(matches!(
            storage.select_adapter(Some("legacy"), &DispatchArg::None),
            Err(StorageError::UnknownAdapter(name)) if name == "oracle"
        ));
    }

    #[test]
    fn test_dispatcher_routes_by_id() {
        let storage = Storage::new(QuarryConfig::empty()).unwrap();
        let even: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        let odd: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
        storage.register_adapter("blog.even", even.clone());
        storage.register_adapter("blog.odd", odd.clone());
        storage.set_dispatcher(
            "blog",
            Arc::new(|_: &str, arg: &DispatchArg| match arg {
                DispatchArg::Id(id) => {
                    let n = id.as_scalar()?.as_i64()?;
                    Some(if n % 2 == 0 { "even" } else { "odd" }.to_string())
                }
                _ => None,
            }),
        );

        let picked = storage
            .select_adapter(Some("blog"), &DispatchArg::Id(Id::from(4)))
            .unwrap();
        assert!(Arc::ptr_eq(&picked, &even));
        let picked = storage
            .select_adapter(Some("blog"), &DispatchArg::Id(Id::from(7)))
            .unwrap();
        assert!(Arc::ptr_eq(&picked, &odd));

        assert!(storage.remove_dispatcher("blog"));
        assert_eq!(storage.resolve_domain(Some("blog"), &DispatchArg::Id(Id::from(4))), "blog");
    }

    #[test]
    fn test_default_domain_from_config() {
        let mut config = QuarryConfig::empty();
        config.set("storage.default_domain", "main");
        let storage = Storage::new(config).unwrap();
        assert_eq!(storage.default_domain(), "main");
        assert_eq!(storage.resolve_domain(None, &DispatchArg::None), "main");
    }
}
