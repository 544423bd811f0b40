use quarry_events::{listener, EventHub, Listener, Outcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Hub = EventHub<&'static str, u32, String, String>;
type L = Listener<u32, String, String>;

fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str, outcome: Outcome<String>) -> L {
    let log = log.clone();
    listener(move |ctx: u32| {
        let log = log.clone();
        let outcome = outcome.clone();
        async move {
            log.lock().unwrap().push(format!("{tag}:{ctx}"));
            Ok(outcome)
        }
    })
}

#[tokio::test]
async fn test_no_listeners_returns_none() {
    let hub = Hub::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let hook: L = listener(move |_| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Continue)
        }
    });

    let res = hub.raise(&"before_find", 1, Some(hook)).await.unwrap();
    assert!(res.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_listeners_run_in_registration_order_then_hook() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    hub.add_listener("after_save", recorder(&log, "a", Outcome::Continue));
    hub.add_listener("after_save", recorder(&log, "b", Outcome::Continue));
    let hook = recorder(&log, "hook", Outcome::Continue);

    let res = hub.raise(&"after_save", 7, Some(hook)).await.unwrap().unwrap();
    assert!(!res.completed);
    assert_eq!(res.invoked, 3);
    assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7", "hook:7"]);
}

#[tokio::test]
async fn test_stop_skips_remaining_listeners_for_this_dispatch_only() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    hub.add_listener("before_save", recorder(&log, "a", Outcome::Stop));
    hub.add_listener("before_save", recorder(&log, "b", Outcome::Continue));

    hub.raise(&"before_save", 1, None).await.unwrap();
    hub.raise(&"before_save", 2, None).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["a:1", "a:2"]);
    assert_eq!(hub.listener_count(&"before_save"), 2);
}

#[tokio::test]
async fn test_handled_marks_completed_and_last_result_wins() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    hub.add_listener("before_find", recorder(&log, "a", Outcome::Handled("first".into())));
    hub.add_listener("before_find", recorder(&log, "b", Outcome::Continue));
    hub.add_listener("before_find", recorder(&log, "c", Outcome::Handled("second".into())));

    let res = hub.raise(&"before_find", 0, None).await.unwrap().unwrap();
    assert!(res.completed);
    assert_eq!(res.invoked, 3);
    assert_eq!(res.into_result().as_deref(), Some("second"));
}

#[tokio::test]
async fn test_listener_error_aborts_dispatch() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    hub.add_listener(
        "before_delete",
        listener(|_| async { Err::<Outcome<String>, _>("refused".to_string()) }),
    );
    hub.add_listener("before_delete", recorder(&log, "b", Outcome::Continue));

    let err = hub.raise(&"before_delete", 1, None).await.unwrap_err();
    assert_eq!(err, "refused");
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_removed_listener_no_longer_invoked() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = recorder(&log, "a", Outcome::Continue);
    hub.add_listener("after_read", a.clone());
    hub.add_listener("after_read", recorder(&log, "b", Outcome::Continue));

    assert!(hub.remove_listener(&"after_read", &a));
    hub.raise(&"after_read", 5, None).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["b:5"]);
}

#[tokio::test]
async fn test_events_are_independent() {
    let hub = Hub::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    hub.add_listener("after_create", recorder(&log, "a", Outcome::Continue));

    assert!(hub.raise(&"after_update", 1, None).await.unwrap().is_none());
    assert!(hub.has_listeners(&"after_create"));
    assert!(!hub.has_listeners(&"after_update"));

    hub.clear();
    assert!(!hub.has_listeners(&"after_create"));
}
