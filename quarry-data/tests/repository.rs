mod common;

use common::{fixture, post_record};
use quarry_data::{
    Condition, EntityRef, Id, Saved, StorageError, Value,
};

#[tokio::test]
async fn test_find_one_returns_the_live_instance() {
    let fx = fixture();
    fx.seed_posts(10).await;
    let repo = fx.repo();

    let a = repo.find_one("Post", 1).await.unwrap();
    let reads = fx.statements();
    let b = repo.find_one("Post", 1).await.unwrap();
    assert!(EntityRef::ptr_eq(&a, &b));
    assert_eq!(fx.statements(), reads, "identity hit must not touch storage");

    // same key through an equality condition
    let c = repo
        .find_one("Post", Condition::eq("post_id", 1))
        .await
        .unwrap();
    assert!(EntityRef::ptr_eq(&a, &c));

    // a condition that only resolves to the key after reading
    let d = repo
        .find_one("Post", Condition::eq("title", "post 1"))
        .await
        .unwrap();
    assert!(EntityRef::ptr_eq(&a, &d));
    assert_eq!(repo.identity_len(), 1);
}

#[tokio::test]
async fn test_identity_map_wins_over_fresh_reads() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();

    let post = repo.find_one("Post", 1).await.unwrap();
    post.set("title", "pending").await.unwrap();
    let again = repo
        .find_one("Post", Condition::eq("title", "post 1"))
        .await
        .unwrap();
    assert_eq!(again.get("title").await.unwrap(), Value::from("pending"));
}

#[tokio::test]
async fn test_evict_and_clear_force_a_reload() {
    let fx = fixture();
    fx.seed_posts(10).await;
    let repo = fx.repo();

    let first = repo.find_one("Post", 1).await.unwrap();
    repo.evict(&first).await.unwrap();
    let second = repo.find_one("Post", 1).await.unwrap();
    assert!(!EntityRef::ptr_eq(&first, &second));
    assert_eq!(
        second.get("title").await.unwrap(),
        first.get("title").await.unwrap()
    );

    repo.clear();
    assert_eq!(repo.identity_len(), 0);
    let third = repo.find_one("Post", 1).await.unwrap();
    assert!(!EntityRef::ptr_eq(&second, &third));

    assert!(repo.evict_id("Post", 1).unwrap());
    assert!(!repo.evict_id("Post", 1).unwrap());
}

#[tokio::test]
async fn test_evict_rejects_unsaved_entities() {
    let fx = fixture();
    let repo = fx.repo();
    let post = repo.new_entity("Post").unwrap();
    assert!(matches!(
        repo.evict(&post).await,
        Err(StorageError::NotSaved(_))
    ));
}

#[tokio::test]
async fn test_save_round_trip() {
    let fx = fixture();
    fx.seed_posts(10).await;

    let repo = fx.repo();
    let post = repo.find_one("Post", 1).await.unwrap();
    post.set("title", "X").await.unwrap();
    let saved = repo.save(&post).await.unwrap();
    assert_eq!(saved, Saved::Updated(true));
    assert!(post.changes().await.is_empty());

    let fresh = fx.repo().find_one("Post", 1).await.unwrap();
    assert_eq!(fresh.get("title").await.unwrap(), Value::from("X"));
}

#[tokio::test]
async fn test_missing_entity_is_an_error() {
    let fx = fixture();
    let err = fx.repo().find_one("Post", 42).await.unwrap_err();
    assert!(matches!(err, StorageError::EntityNotFound { ref type_name, .. } if type_name == "Post"));
}

#[tokio::test]
async fn test_update_without_changes_is_a_no_op() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();
    let post = repo.find_one("Post", 1).await.unwrap();

    let before = fx.statements();
    assert!(!repo.update(&post).await.unwrap());
    assert_eq!(repo.save(&post).await.unwrap(), Saved::Updated(false));
    assert_eq!(fx.statements(), before);
}

#[tokio::test]
async fn test_create_assigns_the_generated_key() {
    let fx = fixture();
    fx.seed_posts(3).await;
    let repo = fx.repo();

    let post = repo.new_entity("Post").unwrap();
    post.set("title", "new").await.unwrap();
    post.set("scratch", "kept in memory").await.unwrap();
    let id = repo.create(&post).await.unwrap();
    assert_eq!(id, Id::from(4));
    assert_eq!(post.id().await.unwrap(), id);
    assert!(!post.is_new().await);

    // registered in the identity map
    let found = repo.find_one("Post", 4).await.unwrap();
    assert!(EntityRef::ptr_eq(&post, &found));

    // defaults are written, non-persisted properties are not
    let rows = fx.adapter.rows("post").await;
    let row = rows.last().unwrap();
    assert_eq!(row.get("click_count"), Some(&Value::Int(0)));
    assert_eq!(row.get("body"), Some(&Value::from("")));
    assert!(!row.contains_key("scratch"));
}

#[tokio::test]
async fn test_create_fills_the_autoincrement_without_serial_settings() {
    let storage = std::sync::Arc::new(
        quarry_data::Storage::new(quarry_core::QuarryConfig::empty()).unwrap(),
    );
    let adapter = std::sync::Arc::new(quarry_data::MemoryAdapter::new());
    storage.register_adapter("default", adapter.clone());
    storage.define(common::post());
    let repo = quarry_data::Repository::new(storage);

    for expected in 1..=2 {
        let post = repo.new_entity("Post").unwrap();
        post.set("title", "fresh").await.unwrap();
        assert_eq!(repo.create(&post).await.unwrap(), Id::from(expected));
        assert_eq!(post.get("post_id").await.unwrap(), Value::Int(expected));
    }
    assert_eq!(adapter.rows("post").await[1].get("post_id"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn test_create_requires_mandatory_properties() {
    let fx = fixture();
    let repo = fx.repo();
    let post = repo.new_entity("Post").unwrap();
    let err = repo.create(&post).await.unwrap_err();
    assert!(matches!(err, StorageError::IncompleteProperty { ref prop, .. } if prop == "title"));
    assert!(fx.adapter.rows("post").await.is_empty());
}

#[tokio::test]
async fn test_composite_key_round_trip() {
    let fx = fixture();
    let repo = fx.repo();

    let rev = repo.new_entity("Revision").unwrap();
    rev.set("post_id", 7).await.unwrap();
    rev.set("note", "first").await.unwrap();
    let id = repo.create(&rev).await.unwrap();
    let expected = Id::composite([("post_id", 7), ("rev_id", 1)]);
    assert_eq!(id, expected);
    assert_eq!(rev.id().await.unwrap(), expected);

    let again = repo
        .find_one("Revision", Id::composite([("rev_id", 1), ("post_id", 7)]))
        .await
        .unwrap();
    assert!(EntityRef::ptr_eq(&rev, &again));

    let err = repo.find_multi("Revision", [1]).await.unwrap_err();
    assert!(matches!(err, StorageError::CompositeKeyUnsupported { .. }));
}

#[tokio::test]
async fn test_find_multi_mixes_cached_and_stored_records() {
    let fx = fixture();
    fx.seed_posts(5).await;
    let repo = fx.repo();

    let two = repo.find_one("Post", 2).await.unwrap();
    let before = fx.statements();
    let found = repo.find_multi("Post", [3, 2, 99, 1]).await.unwrap();
    assert_eq!(fx.statements(), before + 1, "misses are read with one query");

    let ids: Vec<Value> = found.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
    assert!(EntityRef::ptr_eq(&found[1].1, &two));
    assert_eq!(repo.identity_len(), 3);

    let before = fx.statements();
    let cached = repo.find_multi("Post", [1, 3]).await.unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(fx.statements(), before);
}

#[tokio::test]
async fn test_finder_returns_fresh_instances() {
    let fx = fixture();
    fx.seed_posts(5).await;
    let repo = fx.repo();

    let live = repo.find_one("Post", 1).await.unwrap();
    let mut finder = repo
        .find("Post", Condition::all())
        .unwrap()
        .sort("post_id", true)
        .limit(2);
    let first = finder.fetch_entity().await.unwrap().unwrap();
    assert!(!EntityRef::ptr_eq(&live, &first));
    assert_eq!(first.get("post_id").await.unwrap(), Value::Int(1));
    assert!(finder.fetch_entity().await.unwrap().is_some());
    assert!(finder.fetch_entity().await.unwrap().is_none());
    assert_eq!(repo.identity_len(), 1);

    let count = repo.find("Post", Condition::all()).unwrap().count().await.unwrap();
    assert_eq!(count, 5);

    let mut titles = Vec::new();
    let n = repo
        .find("Post", Condition::cmp("post_id", quarry_data::CmpOp::Gt, 3))
        .unwrap()
        .each(|record| titles.push(record["title"].clone()))
        .await
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(titles, vec![Value::from("post 4"), Value::from("post 5")]);
}

#[tokio::test]
async fn test_delete_evicts_and_reports() {
    let fx = fixture();
    fx.seed_posts(3).await;
    let repo = fx.repo();

    let post = repo.find_one("Post", 2).await.unwrap();
    assert!(repo.delete(&post).await.unwrap());
    assert_eq!(repo.identity_len(), 0);
    assert_eq!(fx.adapter.rows("post").await.len(), 2);

    // the row is gone, deleting again affects nothing
    assert!(!repo.delete(&post).await.unwrap());

    let fresh = repo.new_entity("Post").unwrap();
    assert!(matches!(
        repo.delete(&fresh).await,
        Err(StorageError::NotSaved(_))
    ));
}

#[tokio::test]
async fn test_delete_refuses_to_remove_several_rows() {
    let fx = fixture();
    fx.adapter.seed("post", post_record(1, "twin")).await;
    fx.adapter.seed("post", post_record(1, "twin")).await;
    let repo = fx.repo();

    let post = repo
        .find_one("Post", Condition::eq("title", "twin"))
        .await
        .unwrap();
    let err = repo.delete(&post).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::UnexpectedRowCount { count: 2, .. }
    ));
    assert_eq!(repo.identity_len(), 0);
}

#[tokio::test]
async fn test_delete_one_and_delete_by() {
    let fx = fixture();
    fx.seed_posts(6).await;
    let repo = fx.repo();

    assert!(repo.delete_one("Post", 1).await.unwrap());
    let deleted = repo
        .delete_by("Post", Condition::cmp("post_id", quarry_data::CmpOp::Ge, 4))
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(fx.adapter.rows("post").await.len(), 2);
}

#[tokio::test]
async fn test_erase_works_without_entities() {
    let fx = fixture();
    fx.seed_posts(5).await;
    let repo = fx.repo();

    let live = repo.find_one("Post", 1).await.unwrap();
    assert!(repo.erase_one("Post", 1).await.unwrap());
    assert!(!repo.erase_one("Post", 1).await.unwrap());
    assert_eq!(repo.identity_len(), 0);
    drop(live);

    let erased = repo
        .erase_by("Post", Condition::is_in("post_id", [2, 3, 42]))
        .await
        .unwrap();
    assert_eq!(erased, 2);
    assert_eq!(fx.adapter.rows("post").await.len(), 2);
}

#[tokio::test]
async fn test_entity_property_errors() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();

    let post = repo.new_entity("Post").unwrap();
    assert!(matches!(
        post.get("nope").await,
        Err(StorageError::UnknownProperty { .. })
    ));
    assert!(matches!(
        post.get("title").await,
        Err(StorageError::IncompleteProperty { .. })
    ));
    assert_eq!(post.get("click_count").await.unwrap(), Value::Int(0));

    let loaded = repo.find_one("Post", 1).await.unwrap();
    assert!(matches!(
        loaded.set("post_id", 9).await,
        Err(StorageError::ReadOnly { .. })
    ));
}

#[tokio::test]
async fn test_readonly_and_transient_types_are_not_written() {
    let fx = fixture();
    fx.storage.define(
        common::post_props()
            .into_iter()
            .fold(quarry_data::EntityDef::new("Archive").collection("post").readonly(), quarry_data::EntityDef::prop),
    );
    fx.storage.define(
        quarry_data::EntityDef::new("Draft")
            .nonp()
            .prop(quarry_data::PropDef::new("id").kind("serial")),
    );
    fx.seed_posts(1).await;
    let repo = fx.repo();

    let archived = repo.find_one("Archive", 1).await.unwrap();
    assert!(matches!(
        archived.set("title", "x").await,
        Err(StorageError::ReadOnly { prop: None, .. })
    ));
    assert!(matches!(
        repo.delete(&archived).await,
        Err(StorageError::ReadOnly { .. })
    ));

    let draft = repo.new_entity("Draft").unwrap();
    assert!(matches!(
        repo.save(&draft).await,
        Err(StorageError::NonPersistable(_))
    ));
}
