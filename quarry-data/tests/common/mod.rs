#![allow(dead_code)]

use quarry_core::QuarryConfig;
use quarry_data::{EntityDef, MemoryAdapter, PropDef, Record, Repository, Storage, Value};
use std::sync::Arc;

pub struct Fixture {
    pub storage: Arc<Storage>,
    pub adapter: Arc<MemoryAdapter>,
}

impl Fixture {
    pub fn repo(&self) -> Repository {
        Repository::new(self.storage.clone())
    }

    pub fn statements(&self) -> usize {
        self.adapter.statement_count()
    }

    /// Seed posts 1..=n titled `post <id>`.
    pub async fn seed_posts(&self, n: i64) {
        for id in 1..=n {
            self.adapter.seed("post", post_record(id, &format!("post {id}"))).await;
        }
    }
}

pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn post_record(id: i64, title: &str) -> Record {
    record(&[
        ("post_id", Value::Int(id)),
        ("title", title.into()),
        ("body", "".into()),
        ("click_count", Value::Int(0)),
        ("stock", Value::Int(3)),
    ])
}

pub fn post_props() -> Vec<PropDef> {
    vec![
        PropDef::new("post_id").kind("int").autoincr(),
        PropDef::new("title").kind("string(80)"),
        PropDef::new("body").kind("text").default(""),
        PropDef::new("author").kind("string").optional(),
        PropDef::new("click_count").kind("int").default(0).update("incr"),
        PropDef::new("stock").kind("int").default(3).update("gt_zero"),
        PropDef::new("scratch").kind("string").nonp().optional(),
    ]
}

pub fn post() -> EntityDef {
    post_props()
        .into_iter()
        .fold(EntityDef::new("Post").update("changed | check_changed"), EntityDef::prop)
}

pub fn revision() -> EntityDef {
    EntityDef::new("Revision")
        .prop(PropDef::new("post_id").kind("int").id())
        .prop(PropDef::new("rev_id").kind("int").autoincr())
        .prop(PropDef::new("note").kind("text").optional())
}

pub fn users() -> Vec<EntityDef> {
    vec![
        EntityDef::new("User")
            .collection("users")
            .inheritance("kind", "Guest=0, Member, Admin")
            .prop(PropDef::new("user_id").kind("serial"))
            .prop(PropDef::new("name").kind("string(40)"))
            .prop(PropDef::new("kind").kind("int").default(0)),
        EntityDef::new("Guest").extends("User"),
        EntityDef::new("Member")
            .extends("User")
            .prop(PropDef::new("level").kind("int").default(1)),
        EntityDef::new("Admin")
            .extends("Member")
            .prop(PropDef::new("scope").kind("string").default("all")),
    ]
}

pub fn fixture() -> Fixture {
    fixture_with(QuarryConfig::empty())
}

pub fn fixture_with(config: QuarryConfig) -> Fixture {
    let storage = Arc::new(Storage::new(config).unwrap());
    let adapter = Arc::new(
        MemoryAdapter::new()
            .with_serial("post", "post_id")
            .with_serial("revision", "rev_id")
            .with_serial("users", "user_id"),
    );
    storage.register_adapter("default", adapter.clone());
    storage.define(post());
    storage.define(revision());
    for def in users() {
        storage.define(def);
    }
    Fixture { storage, adapter }
}
