mod common;

use common::{fixture, post_record};
use quarry_data::{
    on, EntityRef, EventArgs, EventKind, FindArgs, ModelListener, Outcome, Record, StorageError,
    Value,
};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(log: &Log, label: &'static str) -> ModelListener {
    let log = log.clone();
    on(move |args: EventArgs| {
        let log = log.clone();
        async move {
            let subject = match &args {
                EventArgs::Find(FindArgs::One { .. }) => "one",
                EventArgs::Find(FindArgs::Multi { .. }) => "multi",
                _ => "entity",
            };
            log.lock().unwrap().push(format!("{label}:{subject}"));
            Ok::<_, StorageError>(Outcome::<Vec<Record>>::Continue)
        }
    })
}

#[tokio::test]
async fn test_completed_before_find_skips_storage() {
    let fx = fixture();
    let repo = fx.repo();
    let meta = repo.metadata_for("Post").unwrap();
    meta.add_listener(
        EventKind::BeforeFind,
        on(|args: EventArgs| async move {
            let served = match args {
                EventArgs::Find(FindArgs::One { id: Some(_), .. }) => {
                    vec![post_record(7, "from listener")]
                }
                _ => Vec::new(),
            };
            Ok::<_, StorageError>(Outcome::Handled(served))
        }),
    );

    let post = repo.find_one("Post", 7).await.unwrap();
    assert_eq!(fx.statements(), 0);
    assert_eq!(post.get("title").await.unwrap(), Value::from("from listener"));
    assert!(!post.is_new().await);
}

#[tokio::test]
async fn test_mismatched_listener_record_is_rejected() {
    let fx = fixture();
    let repo = fx.repo();
    repo.metadata_for("Post").unwrap().add_listener(
        EventKind::BeforeFind,
        on(|_: EventArgs| async move {
            Ok::<_, StorageError>(Outcome::Handled(vec![post_record(8, "wrong row")]))
        }),
    );
    assert!(matches!(
        repo.find_one("Post", 7).await,
        Err(StorageError::Inconsistent(_))
    ));
}

#[tokio::test]
async fn test_lifecycle_events_fire_in_order() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();
    let meta = repo.metadata_for("Post").unwrap();
    let log: Log = Arc::default();
    for (kind, label) in [
        (EventKind::BeforeFind, "before_find"),
        (EventKind::AfterRead, "after_read"),
        (EventKind::AfterFind, "after_find"),
        (EventKind::BeforeSave, "before_save"),
        (EventKind::BeforeUpdate, "before_update"),
        (EventKind::AfterUpdate, "after_update"),
        (EventKind::AfterSave, "after_save"),
    ] {
        meta.add_listener(kind, recorder(&log, label));
    }

    let post = repo.find_one("Post", 1).await.unwrap();
    post.set("title", "t").await.unwrap();
    repo.save(&post).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before_find:one",
            "after_read:entity",
            "after_find:entity",
            "before_save:entity",
            "before_update:entity",
            "after_update:entity",
            "after_save:entity",
        ]
    );
}

#[tokio::test]
async fn test_type_hook_runs_after_listeners() {
    let fx = fixture();
    let log: Log = Arc::default();
    fx.storage.define(
        common::post()
            .hook(EventKind::AfterRead, recorder(&log, "hook")),
    );
    fx.seed_posts(1).await;
    let repo = fx.repo();
    repo.metadata_for("Post")
        .unwrap()
        .add_listener(EventKind::AfterRead, recorder(&log, "listener"));

    repo.find_one("Post", 1).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["listener:entity", "hook:entity"]);
}

#[tokio::test]
async fn test_stop_ends_one_dispatch_only() {
    let fx = fixture();
    fx.seed_posts(2).await;
    let repo = fx.repo();
    let meta = repo.metadata_for("Post").unwrap();
    let log: Log = Arc::default();
    meta.add_listener(
        EventKind::AfterRead,
        on(|_: EventArgs| async move { Ok::<_, StorageError>(Outcome::<Vec<Record>>::Stop) }),
    );
    let counted = recorder(&log, "late");
    meta.add_listener(EventKind::AfterRead, counted.clone());

    repo.find_one("Post", 1).await.unwrap();
    assert!(log.lock().unwrap().is_empty());

    assert!(meta.remove_listener(EventKind::AfterRead, &counted));
    assert!(!meta.remove_listener(EventKind::AfterRead, &counted));
}

#[tokio::test]
async fn test_failing_listener_aborts_the_operation() {
    let fx = fixture();
    fx.seed_posts(1).await;
    let repo = fx.repo();
    let post = repo.find_one("Post", 1).await.unwrap();
    repo.metadata_for("Post").unwrap().add_listener(
        EventKind::BeforeUpdate,
        on(|_: EventArgs| async move {
            Err::<Outcome<Vec<Record>>, _>(StorageError::Listener("vetoed".into()))
        }),
    );

    post.set("title", "t").await.unwrap();
    let before = fx.statements();
    assert!(matches!(
        repo.update(&post).await,
        Err(StorageError::Listener(_))
    ));
    assert_eq!(fx.statements(), before);
    assert!(!post.changes().await.is_empty());
}

#[tokio::test]
async fn test_after_create_sees_the_new_id() {
    let fx = fixture();
    let repo = fx.repo();
    let seen: Arc<Mutex<Option<quarry_data::Id>>> = Arc::default();
    let slot = seen.clone();
    repo.metadata_for("Post").unwrap().add_listener(
        EventKind::AfterCreate,
        on(move |args: EventArgs| {
            let slot = slot.clone();
            async move {
                if let EventArgs::Created(_, id) = args {
                    *slot.lock().unwrap() = Some(id);
                }
                Ok::<_, StorageError>(Outcome::<Vec<Record>>::Continue)
            }
        }),
    );

    let post: EntityRef = repo.new_entity("Post").unwrap();
    post.set("title", "t").await.unwrap();
    let id = repo.create(&post).await.unwrap();
    assert_eq!(seen.lock().unwrap().clone(), Some(id));
}
