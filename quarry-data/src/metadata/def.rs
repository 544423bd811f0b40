//! Declarative entity definitions, registered once per type.

use quarry_core::ConfigValue;
use std::collections::BTreeMap;

use crate::events::{EventKind, ModelListener};
use crate::metadata::methods::{DynamicMethod, StaticMethod};
use crate::value::Value;

/// Definition of one mapped entity type.
///
/// ```ignore
/// EntityDef::new("Post")
///     .update("changed | check_changed")
///     .prop(PropDef::new("post_id").kind("int").id().field("post_id"))
///     .prop(PropDef::new("title").kind("string(80)"))
///     .prop(PropDef::new("click_count").kind("int").default(0).update("incr"));
/// ```
#[derive(Clone)]
pub struct EntityDef {
    pub(crate) type_name: String,
    pub(crate) domain: Option<String>,
    pub(crate) collection: Option<String>,
    pub(crate) update: Option<String>,
    pub(crate) parent: Option<String>,
    pub(crate) inheritance: Option<(String, String)>,
    pub(crate) readonly: bool,
    pub(crate) nonp: bool,
    pub(crate) bindings: Vec<PluginSpec>,
    pub(crate) props: Vec<PropDef>,
    pub(crate) hooks: Vec<(EventKind, ModelListener)>,
    pub(crate) methods: Vec<(String, DynamicMethod)>,
    pub(crate) static_methods: Vec<(String, StaticMethod)>,
}

impl EntityDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            domain: None,
            collection: None,
            update: None,
            parent: None,
            inheritance: None,
            readonly: false,
            nonp: false,
            bindings: Vec::new(),
            props: Vec::new(),
            hooks: Vec::new(),
            methods: Vec::new(),
            static_methods: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Storage domain; the configured default domain when unset.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Collection (table) name; the lowercased type name when unset.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Update policy tokens, e.g. `"all | check_changed"`.
    pub fn update(mut self, tokens: impl Into<String>) -> Self {
        self.update = Some(tokens.into());
        self
    }

    /// Make this type a subtype of another mapped type.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Single-table inheritance: `by` is the discriminator field, `classes`
    /// a comma separated list of `Type[=value]` tokens.
    pub fn inheritance(mut self, by: impl Into<String>, classes: impl Into<String>) -> Self {
        self.inheritance = Some((by.into(), classes.into()));
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Instances of this type are never written to storage.
    pub fn nonp(mut self) -> Self {
        self.nonp = true;
        self
    }

    pub fn bind(mut self, plugin: PluginSpec) -> Self {
        self.bindings.push(plugin);
        self
    }

    pub fn prop(mut self, prop: PropDef) -> Self {
        self.props.push(prop);
        self
    }

    /// The type's own handler for `kind`, run after the registered listeners
    /// whenever the event has an entity of this type as subject.
    pub fn hook(mut self, kind: EventKind, listener: ModelListener) -> Self {
        self.hooks.push((kind, listener));
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: DynamicMethod) -> Self {
        self.methods.push((name.into(), method));
        self
    }

    pub fn static_method(mut self, name: impl Into<String>, method: StaticMethod) -> Self {
        self.static_methods.push((name.into(), method));
        self
    }
}

/// Definition of one property.
#[derive(Debug, Clone)]
pub struct PropDef {
    pub(crate) name: String,
    pub(crate) kind: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) id: bool,
    pub(crate) autoincr: bool,
    pub(crate) optional: bool,
    pub(crate) nonp: bool,
    pub(crate) readonly: bool,
    pub(crate) internal: bool,
    pub(crate) field: Option<String>,
    pub(crate) getter: Option<String>,
    pub(crate) setter: Option<String>,
    pub(crate) update: Option<String>,
}

impl PropDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            default: None,
            id: false,
            autoincr: false,
            optional: false,
            nonp: false,
            readonly: false,
            internal: false,
            field: None,
            getter: None,
            setter: None,
            update: None,
        }
    }

    /// Type token: `int`, `smallint`, `float`, `bool`, `text`, `serial`,
    /// `string` or `string(len)`.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Part of the primary key.
    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Primary key component assigned by the store on insert.
    pub fn autoincr(mut self) -> Self {
        self.id = true;
        self.autoincr = true;
        self
    }

    /// May be left unset when the entity is created.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Kept on the entity but never stored.
    pub fn nonp(mut self) -> Self {
        self.nonp = true;
        self
    }

    /// Cannot be changed once the entity has been loaded.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Not managed by the mapper at all.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Dynamic method applied to the stored value on read.
    pub fn getter(mut self, method: impl Into<String>) -> Self {
        self.getter = Some(method.into());
        self
    }

    /// Dynamic method applied to the assigned value on write.
    pub fn setter(mut self, method: impl Into<String>) -> Self {
        self.setter = Some(method.into());
        self
    }

    /// Property update policy: `overwrite`, `incr`, `gt_zero`, `gte_zero`
    /// or `ignore`.
    pub fn update(mut self, policy: impl Into<String>) -> Self {
        self.update = Some(policy.into());
        self
    }
}

/// A plugin binding: plugin name, optional config section, inline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginSpec {
    pub(crate) plugin: String,
    pub(crate) config: Option<String>,
    pub(crate) settings: BTreeMap<String, ConfigValue>,
}

impl PluginSpec {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            config: None,
            settings: BTreeMap::new(),
        }
    }

    /// Read settings from the config section `key`; inline settings added
    /// with [`setting`](Self::setting) override them.
    pub fn from_config(plugin: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            config: Some(key.into()),
            ..Self::new(plugin)
        }
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}
