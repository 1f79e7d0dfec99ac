mod common;

use chatbridge_core::{Direction, SessionState};
use chatbridge_session::{SessionError, TickOutcome, TickReport, provider::LoopbackProvider};
use chrono::{TimeDelta, Utc};
use common::{events_named, harness, ready_harness};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_due_entry_delivered_once() {
    let h = ready_harness().await;
    let entry = h
        .engine
        .schedule("c1", "hello later", Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();
    assert!(!entry.sent);

    let outcome = assert_ok!(h.engine.tick().await);
    assert_eq!(
        outcome,
        TickOutcome::Completed(TickReport {
            attempted: 1,
            delivered: 1,
            failed: 0,
        })
    );

    let doc = h.session.journal().snapshot().await;
    let stored = &doc.scheduled_messages[0];
    assert!(stored.sent);
    assert!(stored.sent_at_timestamp.is_some());
    assert_eq!(doc.messages.len(), 1);
    assert_eq!(doc.messages[0].content, "hello later");
    assert_eq!(doc.messages[0].direction, Direction::Outbound);

    let events = events_named(&h.hub, "new-message");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload()["type"], "scheduled");

    // Second tick sends nothing
    let outcome = assert_ok!(h.engine.tick().await);
    assert_eq!(outcome, TickOutcome::Completed(TickReport::default()));
    assert_eq!(h.provider.sent().len(), 1);
}

#[tokio::test]
async fn test_future_entry_not_due() {
    let h = ready_harness().await;
    let now = Utc::now();
    h.engine
        .schedule("c1", "tomorrow", now + TimeDelta::days(1))
        .await
        .unwrap();

    let outcome = h.engine.tick_at(now).await.unwrap();
    assert_eq!(outcome, TickOutcome::Completed(TickReport::default()));
    assert!(h.provider.sent().is_empty());

    let outcome = h
        .engine
        .tick_at(now + TimeDelta::days(1))
        .await
        .unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(r) if r.delivered == 1));
}

#[tokio::test]
async fn test_failure_records_error_and_retries() {
    let h = ready_harness().await;
    h.provider.set_failing("c1", true);
    h.engine
        .schedule("c1", "retry me", Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();

    for _ in 0..2 {
        let outcome = h.engine.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed(r) if r.failed == 1));
    }

    let stored = h.engine.scheduled().await.remove(0);
    assert!(!stored.sent);
    assert!(stored.last_error.is_some());
    assert!(events_named(&h.hub, "new-message").is_empty());

    h.provider.set_failing("c1", false);
    let outcome = h.engine.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(r) if r.delivered == 1));
    assert!(h.engine.scheduled().await[0].sent);
}

#[tokio::test]
async fn test_one_failure_does_not_block_others() {
    let h = ready_harness().await;
    h.provider.set_failing("bad", true);
    let past = Utc::now() - TimeDelta::seconds(1);
    h.engine.schedule("bad", "one", past).await.unwrap();
    h.engine.schedule("good", "two", past).await.unwrap();

    let outcome = h.engine.tick().await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Completed(TickReport {
            attempted: 2,
            delivered: 1,
            failed: 1,
        })
    );
    assert_eq!(h.provider.sent(), vec![("good".to_string(), "two".to_string())]);
}

#[tokio::test]
async fn test_not_ready_sends_nothing() {
    let h = harness(LoopbackProvider::with_script(Vec::new()));
    h.session.ensure_started().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Starting);

    h.engine
        .schedule("c1", "waiting", Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::NotReady);
    assert!(h.provider.sent().is_empty());
    assert!(!h.engine.scheduled().await[0].sent);
}

#[tokio::test]
async fn test_due_entries_sent_in_insertion_order() {
    let h = ready_harness().await;
    let now = Utc::now();
    h.engine
        .schedule("c1", "first", now - TimeDelta::seconds(1))
        .await
        .unwrap();
    h.engine
        .schedule("c2", "second", now - TimeDelta::minutes(5))
        .await
        .unwrap();
    h.engine
        .schedule("c3", "third", now - TimeDelta::seconds(30))
        .await
        .unwrap();

    h.engine.tick_at(now).await.unwrap();

    let contents: Vec<_> = h.provider.sent().into_iter().map(|(_, c)| c).collect();
    assert_eq!(contents, ["first", "second", "third"]);
}

#[tokio::test]
async fn test_schedule_rejects_blank_input() {
    let h = ready_harness().await;

    let result = h.engine.schedule("", "x", Utc::now()).await;
    assert!(matches!(result, Err(SessionError::InvalidInput(_))));
    let result = h.engine.schedule("c1", "", Utc::now()).await;
    assert!(matches!(result, Err(SessionError::InvalidInput(_))));

    assert!(h.engine.scheduled().await.is_empty());
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_persist_failure_leaves_entry_unsent() {
    let h = ready_harness().await;
    h.engine
        .schedule("c1", "fragile", Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();

    h.store.set_fail_writes(true);
    let result = h.engine.tick().await;
    assert!(matches!(result, Err(SessionError::Store(_))));
    h.store.set_fail_writes(false);

    // At-least-once: the entry is sent again on the next tick
    assert!(!h.engine.scheduled().await[0].sent);
    let outcome = h.engine.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(r) if r.delivered == 1));
    assert_eq!(h.provider.sent().len(), 2);
}

#[tokio::test]
async fn test_concurrent_ticks_do_not_double_send() {
    let h = ready_harness().await;
    h.engine
        .schedule("c1", "once", Utc::now() - TimeDelta::seconds(1))
        .await
        .unwrap();

    let (a, b) = tokio::join!(h.engine.tick(), h.engine.tick());
    a.unwrap();
    b.unwrap();
    assert_eq!(h.provider.sent().len(), 1);
}
