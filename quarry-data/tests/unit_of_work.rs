mod common;

use common::fixture;
use quarry_data::{StorageError, UnitOfWork, Value};

#[tokio::test]
async fn test_saves_every_entity() {
    let fx = fixture();
    fx.seed_posts(2).await;
    let repo = fx.repo();

    let a = repo.find_one("Post", 1).await.unwrap();
    let b = repo.new_entity("Post").unwrap();
    a.set("title", "a").await.unwrap();
    b.set("title", "b").await.unwrap();

    let mut uow = UnitOfWork::new();
    uow.add(&a).await;
    uow.add(&b).await;
    uow.add(&a).await;
    assert_eq!(uow.len(), 2);

    assert!(uow.save(&repo).await.unwrap());
    assert!(a.changes().await.is_empty());
    assert_eq!(b.id().await.unwrap(), quarry_data::Id::from(3));
}

#[tokio::test]
async fn test_conflict_restores_processed_entities() {
    let fx = fixture();
    fx.seed_posts(2).await;
    let repo = fx.repo();

    let a = repo.find_one("Post", 1).await.unwrap();
    let b = repo.find_one("Post", 2).await.unwrap();
    a.set("title", "a").await.unwrap();
    b.set("title", "b").await.unwrap();

    // someone else changes post 2 first
    let other_repo = fx.repo();
    let other = other_repo.find_one("Post", 2).await.unwrap();
    other.set("title", "elsewhere").await.unwrap();
    assert!(other_repo.update(&other).await.unwrap());

    let mut uow = UnitOfWork::new();
    uow.add(&a).await;
    uow.add(&b).await;
    assert!(!uow.save(&repo).await.unwrap());

    // a was written, but its in-memory state is back to the snapshot
    assert_eq!(a.changes().await.get("title"), Some(&Value::from("a")));
    assert_eq!(b.changes().await.get("title"), Some(&Value::from("b")));
    assert_eq!(fx.adapter.rows("post").await[0]["title"], Value::from("a"));
}

#[tokio::test]
async fn test_errors_restore_and_propagate() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();

    let a = repo.find_one("Post", 1).await.unwrap();
    a.set("title", "a").await.unwrap();
    let incomplete = repo.new_entity("Post").unwrap();

    let mut uow = UnitOfWork::new();
    uow.add(&a).await;
    uow.add(&incomplete).await;
    let err = uow.save(&repo).await.unwrap_err();
    assert!(matches!(err, StorageError::IncompleteProperty { .. }));
    assert!(!a.changes().await.is_empty());
    assert!(!a.is_new().await);
}
