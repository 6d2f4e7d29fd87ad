//! Transaction semantics: all-or-nothing application and per-operation
//! cancellation reasons in input order.

mod support;

use std::sync::Arc;
use support::plain_db;
use theorydb_core::{AttributeValue, ErrorKind, Filter, TheoryError};
use theorydb_expr::Update;
use theorydb_test_utils::{FixedClock, Notification, User};

fn user(sk: &str, nickname: &str) -> User {
    User {
        pk: "T#1".into(),
        sk: sk.into(),
        nickname: nickname.into(),
        ..User::default()
    }
}

#[tokio::test]
async fn transaction_applies_all_operations() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    db.create_table::<Notification>().await.unwrap();
    let users = db.model::<User>().unwrap();

    db.transact_write()
        .create(&user("A", "alpha"))
        .await
        .unwrap()
        .create(&user("B", "beta"))
        .await
        .unwrap()
        .put(&Notification {
            pk: "T#1".into(),
            sk: "NOTIF#1".into(),
            body: "created".into(),
        })
        .await
        .unwrap()
        .exec()
        .await
        .unwrap();

    assert_eq!(users.get(User::key("T#1", "A")).await.unwrap().nickname, "alpha");
    assert_eq!(users.get(User::key("T#1", "B")).await.unwrap().nickname, "beta");
}

#[tokio::test]
async fn cancellation_reasons_arrive_in_input_order() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    users.create(&user("A", "alpha")).await.unwrap();

    // Second op collides with the existing key; first and third are fine.
    let err = db
        .transact_write()
        .create(&user("B", "beta"))
        .await
        .unwrap()
        .create(&user("A", "duplicate"))
        .await
        .unwrap()
        .delete::<User>(User::key("T#1", "GHOST"), None)
        .await
        .unwrap()
        .exec()
        .await
        .unwrap_err();

    match err {
        TheoryError::TransactCanceled { reasons } => {
            assert_eq!(reasons.len(), 3);
            assert!(!reasons[0].is_failure());
            assert_eq!(reasons[1].code, "ConditionalCheckFailed");
            assert!(!reasons[2].is_failure());
        }
        other => panic!("expected TransactCanceled, got {other:?}"),
    }

    // Nothing was applied.
    assert_eq!(
        users.get(User::key("T#1", "B")).await.unwrap_err().kind(),
        ErrorKind::ItemNotFound
    );
    assert_eq!(
        users.get(User::key("T#1", "A")).await.unwrap().nickname,
        "alpha"
    );
}

#[tokio::test]
async fn transactional_update_respects_optimistic_locking() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    users.create(&user("A", "alpha")).await.unwrap();

    db.transact_write()
        .update::<User>(
            User::key("T#1", "A"),
            Update::new().set("nickname", AttributeValue::s("renamed")),
            Some(0),
        )
        .await
        .unwrap()
        .exec()
        .await
        .unwrap();
    let stored = users.get(User::key("T#1", "A")).await.unwrap();
    assert_eq!(stored.nickname, "renamed");
    assert_eq!(stored.version, 1);

    // Stale version: canceled with a conditional failure.
    let err = db
        .transact_write()
        .update::<User>(
            User::key("T#1", "A"),
            Update::new().set("nickname", AttributeValue::s("stale")),
            Some(0),
        )
        .await
        .unwrap()
        .exec()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactCanceled);
}

#[tokio::test]
async fn condition_checks_guard_unwritten_items() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    users.create(&user("A", "alpha")).await.unwrap();

    // Write B only if A still has its original nickname.
    db.transact_write()
        .condition_check::<User>(
            User::key("T#1", "A"),
            Filter::eq("nickname", AttributeValue::s("alpha")),
        )
        .await
        .unwrap()
        .create(&user("B", "beta"))
        .await
        .unwrap()
        .exec()
        .await
        .unwrap();
    users.get(User::key("T#1", "B")).await.unwrap();

    let err = db
        .transact_write()
        .condition_check::<User>(
            User::key("T#1", "A"),
            Filter::eq("nickname", AttributeValue::s("wrong")),
        )
        .await
        .unwrap()
        .create(&user("C", "gamma"))
        .await
        .unwrap()
        .exec()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactCanceled);
    assert_eq!(
        users.get(User::key("T#1", "C")).await.unwrap_err().kind(),
        ErrorKind::ItemNotFound
    );
}
