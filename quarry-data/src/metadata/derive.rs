use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::def::{EntityDef, PluginSpec, PropDef};
use super::methods::{DynamicMethod, MethodRegistry, StaticMethod};
use super::policy::{PropKind, PropUpdate, UpdatePolicy};
use super::{Inheritance, Metadata, PropMeta};
use crate::error::{Result, StorageError};
use crate::events::{EventKind, ModelEvents, ModelListener};

/// Class data accumulated while walking a hierarchy from its root.
#[derive(Default)]
struct Acc {
    domain: Option<String>,
    collection: Option<String>,
    id_names: Vec<String>,
    autoincr: Option<String>,
    inheritance: Option<Inheritance>,
    readonly: bool,
    nonp: bool,
    update: Option<String>,
    bindings: Vec<PluginSpec>,
    props: Vec<PropMeta>,
    hooks: HashMap<EventKind, ModelListener>,
    methods: Vec<(String, DynamicMethod)>,
    statics: Vec<(String, StaticMethod)>,
}

/// Derive the metadata of the last type in `chain`.
///
/// `chain` lists the definitions of a hierarchy from its root down to the
/// type being derived. Plugins are not bound here.
pub(crate) fn derive(chain: &[Arc<EntityDef>]) -> Result<Metadata> {
    let leaf = chain
        .last()
        .ok_or_else(|| StorageError::InvalidArgument("empty definition chain".into()))?;

    let mut acc = Acc::default();
    for def in chain {
        acc = inspect(def, acc)?;
    }
    finalize(&leaf.type_name, chain, acc)
}

fn inspect(def: &EntityDef, parent: Acc) -> Result<Acc> {
    let type_name = def.type_name.as_str();

    // parent first
    let domain = parent.domain.or_else(|| def.domain.clone());
    let collection = parent
        .collection
        .or_else(|| def.collection.clone())
        .or_else(|| Some(type_name.to_ascii_lowercase()));
    let inheritance = match parent.inheritance {
        Some(inh) => Some(inh),
        None => match &def.inheritance {
            Some((by, classes)) => Some(parse_inheritance(type_name, by, classes)?),
            None => None,
        },
    };

    // child first
    let readonly = def.readonly || parent.readonly;
    let nonp = def.nonp || parent.nonp;
    let update = def.update.clone().or(parent.update);

    let mut bindings = def.bindings.clone();
    for spec in parent.bindings {
        if !bindings.iter().any(|b| b.plugin == spec.plugin) {
            bindings.push(spec);
        }
    }

    let props = merge_props(parent.props, &def.props);

    let mut hooks = parent.hooks;
    hooks.extend(def.hooks.iter().cloned());
    let mut methods = parent.methods;
    methods.extend(def.methods.iter().cloned());
    let mut statics = parent.statics;
    statics.extend(def.static_methods.iter().cloned());

    let (id_names, autoincr) = if parent.id_names.is_empty() {
        collect_ids(type_name, &props)?
    } else {
        (parent.id_names, parent.autoincr)
    };

    Ok(Acc {
        domain,
        collection,
        id_names,
        autoincr,
        inheritance,
        readonly,
        nonp,
        update,
        bindings,
        props,
        hooks,
        methods,
        statics,
    })
}

/// Re-declared properties keep the parent's name, type, key flags and field.
fn merge_props(inherited: Vec<PropMeta>, own: &[PropDef]) -> Vec<PropMeta> {
    let mut props = inherited;
    for def in own {
        let Some(mut prop) = prop_meta(def) else {
            continue;
        };
        match props.iter_mut().find(|p| p.name == prop.name) {
            Some(parent) => {
                prop.kind = parent.kind;
                prop.id = parent.id;
                prop.autoincr = parent.autoincr;
                prop.field = parent.field.clone();
                *parent = prop;
            }
            None => props.push(prop),
        }
    }
    props
}

fn prop_meta(def: &PropDef) -> Option<PropMeta> {
    if def.internal {
        return None;
    }
    let (kind, len) = PropKind::parse(def.kind.as_deref().unwrap_or("string"));
    let serial = kind == PropKind::Serial;
    Some(PropMeta {
        name: def.name.clone(),
        kind,
        len,
        default: def.default.clone(),
        id: def.id || serial,
        autoincr: def.autoincr || serial,
        optional: def.optional,
        nonp: def.nonp,
        readonly: def.readonly,
        field: def.field.clone().unwrap_or_else(|| def.name.clone()),
        getter: def.getter.clone(),
        setter: def.setter.clone(),
        update: def
            .update
            .as_deref()
            .and_then(PropUpdate::parse)
            .unwrap_or_default(),
    })
}

fn collect_ids(type_name: &str, props: &[PropMeta]) -> Result<(Vec<String>, Option<String>)> {
    let mut ids = Vec::new();
    let mut autoincr = None;
    for prop in props.iter().filter(|p| p.id && !p.nonp) {
        ids.push(prop.name.clone());
        if prop.autoincr {
            if autoincr.is_some() {
                return Err(StorageError::invalid_definition(
                    type_name,
                    "more than one autoincrement key",
                ));
            }
            autoincr = Some(prop.name.clone());
        }
    }
    Ok((ids, autoincr))
}

/// Parse `"Guest=0, Member, Admin"`: values count up from 1, an explicit
/// `=value` restarts the count at that value.
fn parse_inheritance(type_name: &str, by: &str, classes: &str) -> Result<Inheritance> {
    let by = by.trim();
    let tokens: Vec<&str> = classes
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if by.is_empty() || tokens.is_empty() {
        return Err(StorageError::invalid_definition(type_name, "extends"));
    }

    let mut map = BTreeMap::new();
    let mut offset: i64 = 1;
    for token in tokens {
        let name = match token.split_once('=') {
            Some((name, value)) => {
                offset = value.trim().parse().map_err(|_| {
                    StorageError::invalid_definition(type_name, format!("extends value '{token}'"))
                })?;
                name.trim()
            }
            None => token,
        };
        if name.is_empty() {
            return Err(StorageError::invalid_definition(type_name, "extends"));
        }
        map.insert(offset.to_string(), name.to_string());
        offset += 1;
    }
    Ok(Inheritance {
        by: by.to_string(),
        classes: map,
    })
}

fn finalize(type_name: &str, chain: &[Arc<EntityDef>], acc: Acc) -> Result<Metadata> {
    if acc.id_names.is_empty() {
        return Err(StorageError::MissingPrimaryKey(type_name.to_string()));
    }

    let update = UpdatePolicy::parse(acc.update.as_deref().unwrap_or("changed"));

    let mut prop_index = HashMap::new();
    let mut props_to_fields = BTreeMap::new();
    let mut fields_to_props = BTreeMap::new();
    let mut spec_update_props = BTreeMap::new();
    for (i, prop) in acc.props.iter().enumerate() {
        prop_index.insert(prop.name.clone(), i);
        if prop.nonp {
            continue;
        }
        props_to_fields.insert(prop.name.clone(), prop.field.clone());
        fields_to_props.insert(prop.field.clone(), prop.name.clone());
        if prop.update != PropUpdate::Overwrite {
            spec_update_props.insert(prop.name.clone(), prop.update);
        }
    }

    let methods = MethodRegistry::new(type_name);
    for (name, method) in acc.methods {
        methods.add_dynamic(name, method);
    }
    for (name, method) in acc.statics {
        methods.add_static(name, method);
    }

    Ok(Metadata {
        type_name: type_name.to_string(),
        lineage: chain.iter().rev().map(|d| d.type_name.clone()).collect(),
        domain: acc.domain,
        collection: acc
            .collection
            .unwrap_or_else(|| type_name.to_ascii_lowercase()),
        id_names: acc.id_names,
        autoincr: acc.autoincr,
        update,
        readonly: acc.readonly,
        nonp: acc.nonp,
        inheritance: acc.inheritance,
        props: acc.props,
        prop_index,
        props_to_fields,
        fields_to_props,
        spec_update_props,
        bindings: acc.bindings,
        hooks: acc.hooks,
        events: ModelEvents::new(),
        methods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(defs: Vec<EntityDef>) -> Vec<Arc<EntityDef>> {
        defs.into_iter().map(Arc::new).collect()
    }

    fn post() -> EntityDef {
        EntityDef::new("Post")
            .update("changed | check_changed")
            .prop(PropDef::new("postId").kind("int").id().field("post_id"))
            .prop(PropDef::new("title").kind("string(80)"))
            .prop(PropDef::new("author"))
            .prop(PropDef::new("value").kind("int").nonp())
            .prop(PropDef::new("click_count").kind("int").update("incr"))
            .prop(PropDef::new("scratch").internal())
    }

    #[test]
    fn test_derive_simple_type() {
        let meta = derive(&chain(vec![post()])).unwrap();
        assert_eq!(meta.collection(), "post");
        assert_eq!(meta.id_names(), ["postId".to_string()]);
        assert!(!meta.is_composite());
        assert_eq!(meta.field_of("postId"), "post_id");
        assert_eq!(meta.prop("title").unwrap().len, Some(80));
        assert_eq!(meta.prop("author").unwrap().len, Some(200));
        assert!(meta.prop("scratch").is_none());
        assert!(!meta.field_aliases().contains_key("value"));
        assert_eq!(
            meta.spec_update_props().get("click_count"),
            Some(&PropUpdate::Incr)
        );
        assert!(meta.update_policy().checks_changed());
    }

    #[test]
    fn test_missing_primary_key() {
        let err = derive(&chain(vec![EntityDef::new("Orphan").prop(PropDef::new("x"))]))
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingPrimaryKey(t) if t == "Orphan"));
    }

    #[test]
    fn test_ambiguous_autoincrement() {
        let def = EntityDef::new("Bad")
            .prop(PropDef::new("a").kind("serial"))
            .prop(PropDef::new("b").kind("int").autoincr());
        let err = derive(&chain(vec![def])).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_composite_key_with_autoincrement_component() {
        let def = EntityDef::new("Revision")
            .update("all | check_non")
            .prop(PropDef::new("postId").kind("int").id())
            .prop(PropDef::new("rev_id").kind("int").autoincr())
            .prop(PropDef::new("body").kind("text"));
        let meta = derive(&chain(vec![def])).unwrap();
        assert!(meta.is_composite());
        assert_eq!(meta.autoincr(), Some("rev_id"));
        assert!(meta.update_policy().writes_all());
    }

    #[test]
    fn test_inheritance_values_count_from_explicit_offset() {
        let base = EntityDef::new("User")
            .inheritance("cls", "Guest=0, Member, Admin=10, Root")
            .prop(PropDef::new("id").kind("serial"));
        let meta = derive(&chain(vec![base])).unwrap();
        let inh = meta.inheritance().unwrap();
        assert_eq!(inh.by, "cls");
        assert_eq!(inh.classes.get("0").map(String::as_str), Some("Guest"));
        assert_eq!(inh.classes.get("1").map(String::as_str), Some("Member"));
        assert_eq!(inh.classes.get("10").map(String::as_str), Some("Admin"));
        assert_eq!(inh.classes.get("11").map(String::as_str), Some("Root"));
    }

    #[test]
    fn test_inheritance_requires_discriminator_and_classes() {
        let base = EntityDef::new("User")
            .inheritance("", "Guest")
            .prop(PropDef::new("id").kind("serial"));
        assert!(derive(&chain(vec![base])).is_err());

        let base = EntityDef::new("User")
            .inheritance("cls", " , ")
            .prop(PropDef::new("id").kind("serial"));
        assert!(derive(&chain(vec![base])).is_err());
    }

    #[test]
    fn test_subtype_precedence() {
        let base = EntityDef::new("User")
            .domain("accounts")
            .update("all | check_all")
            .inheritance("cls", "Guest, Member")
            .prop(PropDef::new("id").kind("serial"))
            .prop(PropDef::new("name").kind("string(40)").field("user_name"));
        let member = EntityDef::new("Member")
            .extends("User")
            .domain("elsewhere")
            .collection("members")
            .update("changed")
            .readonly()
            .prop(PropDef::new("name").kind("int").field("nick").optional())
            .prop(PropDef::new("level").kind("int"));

        let meta = derive(&chain(vec![base, member])).unwrap();
        // parent first
        assert_eq!(meta.domain(), Some("accounts"));
        assert_eq!(meta.collection(), "user");
        assert_eq!(meta.id_names(), ["id".to_string()]);
        assert!(meta.inheritance().is_some());
        // child first
        assert!(meta.is_readonly());
        assert!(!meta.update_policy().writes_all());
        // re-declared property keeps the parent's storage identity
        let name = meta.prop("name").unwrap();
        assert_eq!(name.kind, PropKind::String);
        assert_eq!(name.field, "user_name");
        assert!(name.optional);
        assert!(meta.prop("level").is_some());
        assert!(meta.is_a("User") && meta.is_a("Member"));
    }

    #[test]
    fn test_domain_falls_back_to_child_when_parent_unset() {
        let base = EntityDef::new("Base").prop(PropDef::new("id").kind("serial"));
        let child = EntityDef::new("Child").extends("Base").domain("shard");
        let meta = derive(&chain(vec![base, child])).unwrap();
        assert_eq!(meta.domain(), Some("shard"));
    }
}
