//! Record cache plugin.
//!
//! Keeps raw records of a type in a [`CacheStore`] under
//! `models.entity.<root type>.<canonical id>`, serves `before_find` from it
//! and keeps it coherent with saves, updates, deletes and erases.
//!
//! Settings: `mode` (`afterread`, `bypassonread`, `aftersave`, combinable),
//! `ttl` in seconds (`0` never expires) and `domain`, the cache backend.

use bytes::Bytes;
use quarry_cache::{CacheBackends, CacheStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::error::{Result, StorageError};
use crate::events::{on, EventArgs, EventKind, FindArgs, Outcome};
use crate::metadata::Metadata;
use crate::plugin::{plugin_factory, ModelPlugin, PluginFactory, PluginSettings};
use crate::value::{Id, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMode {
    /// Store records read from storage.
    pub after_read: bool,
    /// Never serve finds from the cache.
    pub bypass_on_read: bool,
    /// Store records after a successful save.
    pub after_save: bool,
}

impl Default for CacheMode {
    fn default() -> Self {
        Self::parse("afterread")
    }
}

impl CacheMode {
    /// Parse mode tokens separated by commas, spaces or `|`. Unknown tokens
    /// are ignored.
    pub fn parse(tokens: &str) -> Self {
        let mut mode = Self {
            after_read: false,
            bypass_on_read: false,
            after_save: false,
        };
        for token in tokens.split([',', '|', ' ']).map(str::trim) {
            match token.to_ascii_lowercase().as_str() {
                "afterread" => mode.after_read = true,
                "bypassonread" => mode.bypass_on_read = true,
                "aftersave" => mode.after_save = true,
                _ => {}
            }
        }
        mode
    }
}

pub struct CachePlugin {
    mode: CacheMode,
    ttl: Duration,
    store: Arc<dyn CacheStore>,
}

/// Factory registered under the plugin name `cache`.
pub fn factory(backends: CacheBackends) -> PluginFactory {
    plugin_factory(move |settings: &PluginSettings| CachePlugin::from_settings(settings, &backends))
}

impl CachePlugin {
    pub fn new(mode: CacheMode, ttl: Duration, store: Arc<dyn CacheStore>) -> Self {
        Self { mode, ttl, store }
    }

    pub fn from_settings(settings: &PluginSettings, backends: &CacheBackends) -> Result<Self> {
        let mode = match settings.get_opt::<String>("mode")? {
            Some(tokens) => CacheMode::parse(&tokens),
            None => CacheMode::default(),
        };
        let ttl = settings.get_opt::<Duration>("ttl")?.unwrap_or(Duration::ZERO);
        let domain = settings.get_or("domain", "default".to_string());
        Ok(Self::new(mode, ttl, backends.get(&domain)))
    }
}

#[derive(Clone)]
struct Keys {
    prefix: Arc<str>,
}

impl Keys {
    fn of(&self, id: &Id) -> String {
        format!("{}{}", self.prefix, id.canonical())
    }

    fn of_scalar(&self, id: &Value) -> String {
        self.of(&Id::Scalar(id.clone()))
    }
}

fn encode(record: &Record) -> Result<Bytes> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(StorageError::database)
}

fn decode(key: &str, bytes: &[u8]) -> Option<Record> {
    match serde_json::from_slice(bytes) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(key, error = %err, "Discarding undecodable cache entry");
            None
        }
    }
}

type Store = Arc<dyn CacheStore>;

async fn serve_find(store: Store, keys: Keys, args: EventArgs) -> Result<Outcome<Vec<Record>>> {
    let records: Vec<Record> = match args {
        EventArgs::Find(FindArgs::One { id: Some(id), .. }) => {
            let key = keys.of(&id);
            store
                .get(&key)
                .await
                .and_then(|bytes| decode(&key, &bytes))
                .into_iter()
                .collect()
        }
        EventArgs::Find(FindArgs::Multi { ids }) => {
            let wanted: Vec<String> = ids.iter().map(|id| keys.of_scalar(id)).collect();
            let hits = store.get_many(&wanted).await;
            wanted
                .iter()
                .filter_map(|key| decode(key, hits.get(key)?))
                .collect()
        }
        _ => Vec::new(),
    };
    trace!(hits = records.len(), "Record cache lookup");
    Ok(if records.is_empty() {
        Outcome::Continue
    } else {
        Outcome::Handled(records)
    })
}

async fn store_found(
    store: Store,
    keys: Keys,
    ttl: Duration,
    args: EventArgs,
) -> Result<Outcome<Vec<Record>>> {
    match args {
        EventArgs::FoundOne {
            id,
            record,
            from_listener: false,
            ..
        } => store.set(&keys.of(&id), encode(&record)?, ttl).await,
        EventArgs::FoundMulti {
            records,
            from_listener,
            ..
        } => {
            let mut entries = Vec::with_capacity(records.len());
            for (id, record) in records {
                if !from_listener.iter().any(|v| v.loose_eq(&id)) {
                    entries.push((keys.of_scalar(&id), encode(&record)?));
                }
            }
            store.set_many(entries, ttl).await;
        }
        _ => {}
    }
    Ok(Outcome::Continue)
}

/// Refresh the entry of an entity written by `save` or `update`. Without
/// `aftersave` the entry is only invalidated.
async fn sync_written(
    store: Store,
    keys: Keys,
    ttl: Duration,
    store_on_save: bool,
    args: EventArgs,
) -> Result<Outcome<Vec<Record>>> {
    let entity = match args {
        EventArgs::Saved(entity, saved) if saved.is_success() => entity,
        EventArgs::Updated(entity, true) => entity,
        _ => return Ok(Outcome::Continue),
    };
    let (id, record) = {
        let entity = entity.lock().await;
        let record = entity.meta().props_to_fields(&entity.to_props());
        (entity.id()?, record)
    };
    let key = keys.of(&id);
    if store_on_save {
        store.set(&key, encode(&record)?, ttl).await;
    } else {
        store.remove(&key).await;
    }
    Ok(Outcome::Continue)
}

async fn drop_removed(store: Store, keys: Keys, args: EventArgs) -> Result<Outcome<Vec<Record>>> {
    match args {
        EventArgs::Deleted(entity, true) => {
            let id = entity.id().await?;
            store.remove(&keys.of(&id)).await;
        }
        EventArgs::Erased {
            id: Some(id), count, ..
        } if count > 0 => store.remove(&keys.of(&id)).await,
        EventArgs::Erased { id: None, count, .. } if count > 0 => {
            store.remove_by_prefix(&keys.prefix).await;
        }
        _ => {}
    }
    Ok(Outcome::Continue)
}

impl ModelPlugin for CachePlugin {
    fn bind(&self, meta: &Metadata) -> Result<()> {
        let keys = Keys {
            prefix: format!("models.entity.{}.", meta.root_type()).into(),
        };

        if !self.mode.bypass_on_read {
            let (store, keys) = (self.store.clone(), keys.clone());
            meta.add_listener(
                EventKind::BeforeFind,
                on(move |args| serve_find(store.clone(), keys.clone(), args)),
            );
        }

        if self.mode.after_read {
            let (store, keys, ttl) = (self.store.clone(), keys.clone(), self.ttl);
            meta.add_listener(
                EventKind::AfterFind,
                on(move |args| store_found(store.clone(), keys.clone(), ttl, args)),
            );
        }

        for kind in [EventKind::AfterUpdate, EventKind::AfterSave] {
            let (store, keys, ttl, after_save) =
                (self.store.clone(), keys.clone(), self.ttl, self.mode.after_save);
            meta.add_listener(
                kind,
                on(move |args| sync_written(store.clone(), keys.clone(), ttl, after_save, args)),
            );
        }

        for kind in [EventKind::AfterDelete, EventKind::AfterErase] {
            let (store, keys) = (self.store.clone(), keys.clone());
            meta.add_listener(
                kind,
                on(move |args| drop_removed(store.clone(), keys.clone(), args)),
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for CachePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePlugin")
            .field("mode", &self.mode)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tokens() {
        let mode = CacheMode::parse("AfterRead, aftersave");
        assert!(mode.after_read && mode.after_save && !mode.bypass_on_read);

        let mode = CacheMode::parse("bypassonread|aftersave");
        assert!(!mode.after_read && mode.bypass_on_read && mode.after_save);

        assert_eq!(CacheMode::default(), CacheMode::parse("afterread"));
    }
}
