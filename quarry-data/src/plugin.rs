//! Model plugins: extensions bound to a type when its metadata is derived.

use quarry_core::{ConfigValue, FromConfigValue, QuarryConfig};
use std::sync::Arc;

use crate::error::Result;
use crate::metadata::{Metadata, PluginSpec};

/// A behaviour attached to mapped types.
///
/// `bind` runs once per derived [`Metadata`]; plugins register event
/// listeners and dynamic methods on it. Everything registered lives as long
/// as the metadata stays cached.
pub trait ModelPlugin: Send + Sync {
    fn bind(&self, meta: &Metadata) -> Result<()>;
}

/// Builds a plugin from the settings of one binding.
pub type PluginFactory = Arc<dyn Fn(&PluginSettings) -> Result<Box<dyn ModelPlugin>> + Send + Sync>;

/// Settings of one plugin binding.
///
/// The binding's config section (if any) is read first; inline settings
/// override it key by key.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    plugin: String,
    values: QuarryConfig,
}

impl PluginSettings {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            values: QuarryConfig::empty(),
        }
    }

    pub(crate) fn resolve(spec: &PluginSpec, config: &QuarryConfig) -> Self {
        let mut settings = Self::new(spec.plugin());
        if let Some(section) = &spec.config {
            settings.values.import(config.section(section));
        }
        settings
            .values
            .import(spec.settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        settings
    }

    pub fn with(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.values.set(key, value);
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V> {
        Ok(self.values.get(key)?)
    }

    pub fn get_opt<V: FromConfigValue>(&self, key: &str) -> Result<Option<V>> {
        Ok(self.values.get_opt(key)?)
    }

    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> V {
        self.values.get_or(key, default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Wrap a closure building a plugin into a [`PluginFactory`].
pub fn plugin_factory<F, P>(f: F) -> PluginFactory
where
    F: Fn(&PluginSettings) -> Result<P> + Send + Sync + 'static,
    P: ModelPlugin + 'static,
{
    Arc::new(move |settings: &PluginSettings| -> Result<Box<dyn ModelPlugin>> {
        Ok(Box::new(f(settings)?) as Box<dyn ModelPlugin>)
    })
}
