mod loader;
pub mod secrets;
pub mod value;

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub use secrets::{DefaultSecretResolver, SecretResolver};
pub use value::{ConfigValue, FromConfigValue};

/// Prefix of the environment variables overlaid on top of the YAML files.
pub const ENV_PREFIX: &str = "QUARRY_";

/// Error type for configuration operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The requested key was not found in the configuration.
    NotFound(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "Config type mismatch for '{key}': expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flat, dot-keyed configuration consulted by the storage layer.
///
/// Resolution order (lowest to highest priority):
/// 1. `quarry.yaml` (base)
/// 2. `quarry-{profile}.yaml` (profile override)
/// 3. `.env` / `.env.{profile}` files (loaded into the process environment)
/// 4. `QUARRY_*` environment variables: the prefix is dropped, the rest is
///    lowercased and `__` separates segments, so
///    `QUARRY_STORAGE__DEFAULT_DOMAIN` overrides `storage.default_domain`.
///
/// The active profile is `QUARRY_PROFILE` when set, otherwise the argument.
#[derive(Debug, Clone)]
pub struct QuarryConfig {
    values: HashMap<String, ConfigValue>,
    profile: String,
}

impl QuarryConfig {
    /// Load configuration files from `dir` with a custom secret resolver.
    ///
    /// `${...}` placeholders in string values are resolved after the files are
    /// read and before the environment overlay is applied.
    pub fn load_from_dir_with_resolver(
        dir: &Path,
        profile: &str,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let active_profile =
            std::env::var("QUARRY_PROFILE").unwrap_or_else(|_| profile.to_string());

        let mut values = HashMap::new();
        loader::load_yaml_file(&dir.join("quarry.yaml"), &mut values)?;
        loader::load_yaml_file(&dir.join(format!("quarry-{active_profile}.yaml")), &mut values)?;

        // .env files never overwrite variables that are already set
        let _ = dotenvy::from_path(dir.join(".env"));
        let _ = dotenvy::from_path(dir.join(format!(".env.{active_profile}")));

        resolve_string_values(&mut values, resolver)?;
        loader::overlay_env(ENV_PREFIX, std::env::vars(), &mut values);
        debug!(
            dir = %dir.display(),
            profile = %active_profile,
            keys = values.len(),
            "Configuration loaded"
        );

        Ok(QuarryConfig {
            values,
            profile: active_profile,
        })
    }

    /// Load configuration for `profile` from the given directory.
    pub fn load_from_dir(dir: &Path, profile: &str) -> Result<Self, ConfigError> {
        Self::load_from_dir_with_resolver(dir, profile, &DefaultSecretResolver)
    }

    /// Load configuration for `profile` from the current working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from_dir(Path::new("."), profile)
    }

    /// Create a config from a YAML string (useful for testing).
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        loader::load_yaml_str(yaml, &mut values)?;
        Ok(QuarryConfig {
            values,
            profile: profile.to_string(),
        })
    }

    /// Create an empty config.
    pub fn empty() -> Self {
        QuarryConfig {
            values: HashMap::new(),
            profile: "test".to_string(),
        }
    }

    /// Set a value programmatically.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Merge `entries` into the config, later entries win.
    pub fn import<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, ConfigValue)>,
        K: Into<String>,
    {
        for (key, value) in entries {
            self.values.insert(key.into(), value);
        }
    }

    /// Get a typed value for the given dot-separated key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if the key does not exist, or
    /// `ConfigError::TypeMismatch` if the value cannot be converted.
    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    /// Get a typed value, returning `default` if the key is missing or does
    /// not convert.
    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Get a typed value, `None` when the key is absent.
    ///
    /// Unlike [`get_or`](Self::get_or), a present value of the wrong type is
    /// still reported as an error.
    pub fn get_opt<V: FromConfigValue>(&self, key: &str) -> Result<Option<V>, ConfigError> {
        match self.values.get(key) {
            None | Some(ConfigValue::Null) => Ok(None),
            Some(value) => V::from_config_value(value, key).map(Some),
        }
    }

    /// Check whether a key exists in the config.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Collect every entry below `prefix`, keyed relative to it.
    ///
    /// `section("storage.domains.default")` on a config holding
    /// `storage.domains.default.adapter` yields `{"adapter": ...}`. Nested
    /// keys stay dot-separated. Returns an empty map when nothing matches.
    pub fn section(&self, prefix: &str) -> HashMap<String, ConfigValue> {
        let mut out = HashMap::new();
        if let Some(ConfigValue::Map(map)) = self.values.get(prefix) {
            for (k, v) in map {
                out.insert(k.clone(), v.clone());
            }
        }
        let dotted = format!("{prefix}.");
        for (key, value) in &self.values {
            if let Some(rest) = key.strip_prefix(&dotted) {
                out.insert(rest.to_string(), value.clone());
            }
        }
        out
    }

    /// The active profile name.
    pub fn profile(&self) -> &str {
        &self.profile
    }
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self::empty()
    }
}

fn resolve_string_values(
    values: &mut HashMap<String, ConfigValue>,
    resolver: &dyn SecretResolver,
) -> Result<(), ConfigError> {
    for value in values.values_mut() {
        if let ConfigValue::String(s) = value {
            if s.contains("${") {
                *s = secrets::resolve_placeholders(s, resolver)?;
            }
        }
    }
    Ok(())
}
