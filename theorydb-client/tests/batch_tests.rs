//! Batch coordinator behavior: chunking, bounded concurrency, progress
//! reporting, unprocessed-item retry, and typed give-up errors.

mod support;

use std::sync::{Arc, Mutex};
use support::{mock_db, plain_db};
use theorydb_core::{AttributeValue, ErrorKind, Key, TheoryConfig, TheoryError};
use theorydb_test_utils::{FixedClock, Notification, User};

fn batch_config(chunk_size: usize, max_concurrency: usize, max_attempts: u32) -> TheoryConfig {
    let mut config = TheoryConfig::default();
    config.batch.chunk_size = Some(chunk_size);
    config.batch.max_concurrency = max_concurrency;
    config.batch.max_attempts = max_attempts;
    config
}

async fn seed_large_partition(db: &theorydb_client::TheoryDb, count: usize) {
    let notifications = db.model::<Notification>().unwrap();
    for i in 0..count {
        notifications
            .put(&Notification {
                pk: "batch-large".into(),
                sk: format!("item-{i:04}"),
                body: format!("body-{i}"),
            })
            .await
            .unwrap();
    }
}

fn batch_keys(count: usize) -> Vec<Key> {
    (0..count)
        .map(|i| {
            Key::with_sort(
                AttributeValue::s("batch-large"),
                AttributeValue::s(format!("item-{i:04}")),
            )
        })
        .collect()
}

#[tokio::test]
async fn batch_get_reports_progress_and_preserves_input_order() {
    let (db, _store) = mock_db(
        Arc::new(FixedClock::fixture_epoch()),
        batch_config(45, 3, 10),
    );
    db.create_table::<Notification>().await.unwrap();
    seed_large_partition(&db, 120).await;
    let notifications = db.model::<Notification>().unwrap();

    let progress: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);
    // 140 keys: 120 exist, 20 do not.
    let items = notifications
        .batch_get(batch_keys(140))
        .on_progress(move |retrieved, total| {
            seen.lock().unwrap().push((retrieved, total));
        })
        .exec()
        .await
        .unwrap();

    assert_eq!(items.len(), 120);
    // Input key order, missing keys absent.
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.sk, format!("item-{i:04}"));
    }

    let calls = progress.lock().unwrap().clone();
    assert!(calls.len() >= 3, "expected >=3 progress calls, got {calls:?}");
    assert!(calls.iter().all(|(_, total)| *total == 140));
    assert_eq!(calls.last().unwrap().0, 120);
}

#[tokio::test]
async fn batch_get_deduplicates_and_retries_unprocessed_keys() {
    let (db, store) = mock_db(
        Arc::new(FixedClock::fixture_epoch()),
        batch_config(25, 2, 10),
    );
    db.create_table::<Notification>().await.unwrap();
    seed_large_partition(&db, 30).await;
    let notifications = db.model::<Notification>().unwrap();

    // Duplicate every key; the store sees each key once.
    let mut keys = batch_keys(30);
    keys.extend(batch_keys(30));
    // First two chunk calls each leave 5 keys unprocessed.
    store.leave_unprocessed(vec![5, 5]);

    let items = notifications.batch_get(keys).exec().await.unwrap();
    assert_eq!(items.len(), 30);
    // 30 unique keys in chunks of 25 = 2 calls, plus one retry round for
    // the 10 leftovers.
    assert_eq!(store.call_count("batch_get"), 3);
}

#[tokio::test]
async fn batch_get_surfaces_exhausted_remainders_typed() {
    let (db, store) = mock_db(
        Arc::new(FixedClock::fixture_epoch()),
        batch_config(10, 1, 3),
    );
    db.create_table::<Notification>().await.unwrap();
    seed_large_partition(&db, 10).await;
    let notifications = db.model::<Notification>().unwrap();

    // Every attempt leaves 4 keys unprocessed.
    store.leave_unprocessed(vec![4, 4, 4]);
    let err = notifications
        .batch_get(batch_keys(10))
        .exec()
        .await
        .unwrap_err();
    match err {
        TheoryError::ThroughputExceeded {
            attempts,
            unprocessed_count,
            unprocessed_keys,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(unprocessed_count, 4);
            assert_eq!(unprocessed_keys.len(), 4);
        }
        other => panic!("expected ThroughputExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_write_mixes_puts_and_deletes() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Notification>().await.unwrap();
    seed_large_partition(&db, 3).await;
    let notifications = db.model::<Notification>().unwrap();

    db.batch_write()
        .put(&Notification {
            pk: "batch-large".into(),
            sk: "item-9999".into(),
            body: "appended".into(),
        })
        .unwrap()
        .delete::<Notification>(Key::with_sort(
            AttributeValue::s("batch-large"),
            AttributeValue::s("item-0000"),
        ))
        .unwrap()
        .exec()
        .await
        .unwrap();

    let remaining = notifications
        .query("PK", AttributeValue::s("batch-large"))
        .all()
        .await
        .unwrap();
    let keys: Vec<&str> = remaining.iter().map(|n| n.sk.as_str()).collect();
    assert_eq!(keys, vec!["item-0001", "item-0002", "item-9999"]);
}

#[tokio::test]
async fn batch_write_surfaces_unprocessed_writes() {
    let (db, store) = mock_db(
        Arc::new(FixedClock::fixture_epoch()),
        batch_config(25, 1, 2),
    );
    db.create_table::<Notification>().await.unwrap();

    store.leave_unprocessed(vec![2, 2]);
    let mut builder = db.batch_write();
    for i in 0..5 {
        builder = builder
            .put(&Notification {
                pk: "w".into(),
                sk: format!("item-{i}"),
                body: String::new(),
            })
            .unwrap();
    }
    let err = builder.exec().await.unwrap_err();
    match err {
        TheoryError::ThroughputExceeded {
            unprocessed_writes, ..
        } => assert_eq!(unprocessed_writes.len(), 2),
        other => panic!("expected ThroughputExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn throttled_single_calls_retry_then_surface() {
    let (db, store) = mock_db(
        Arc::new(FixedClock::fixture_epoch()),
        batch_config(25, 1, 3),
    );
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    users
        .put(&User {
            pk: "U#1".into(),
            sk: "PROFILE".into(),
            nickname: "Al".into(),
            ..User::default()
        })
        .await
        .unwrap();

    // Two throttles, then success: the retry loop absorbs them.
    store.throttle_next(2);
    users.get(User::key("U#1", "PROFILE")).await.unwrap();
    assert_eq!(store.call_count("get"), 3);

    // More throttles than attempts: surfaced as ThroughputExceeded.
    store.throttle_next(10);
    let err = users.get(User::key("U#1", "PROFILE")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ThroughputExceeded);
}

#[tokio::test]
async fn closed_sessions_cancel_operations() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();

    db.close();
    let err = users.get(User::key("U#1", "PROFILE")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    // Closing again is a no-op.
    db.close();
}
