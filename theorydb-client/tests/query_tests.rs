//! Query semantics: key conditions, sort order, counting, pagination
//! cursors, and filter safety.

mod support;

use std::sync::Arc;
use support::plain_db;
use theorydb_core::{AttributeValue, ErrorKind, Filter, SortKeyCond};
use theorydb_test_utils::{FixedClock, Notification, User};

async fn seed_notifications(db: &theorydb_client::TheoryDb) {
    let notifications = db.model::<Notification>().unwrap();
    for (sk, body) in [
        ("NOTIF#2024-01", "january"),
        ("NOTIF#2024-02", "february"),
        ("NOTIF#2024-03", "march"),
        ("SETTINGS", "not a notification"),
    ] {
        notifications
            .put(&Notification {
                pk: "USER#admin".into(),
                sk: sk.into(),
                body: body.into(),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn begins_with_on_sort_key_with_descending_order() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Notification>().await.unwrap();
    seed_notifications(&db).await;
    let notifications = db.model::<Notification>().unwrap();

    let page = notifications
        .query("PK", AttributeValue::s("USER#admin"))
        .sort_key("SK", SortKeyCond::begins_with("NOTIF#"))
        .desc()
        .page()
        .await
        .unwrap();
    let keys: Vec<&str> = page.items.iter().map(|n| n.sk.as_str()).collect();
    assert_eq!(keys, vec!["NOTIF#2024-03", "NOTIF#2024-02", "NOTIF#2024-01"]);
    assert!(page.cursor.is_none());

    let count = notifications
        .query("PK", AttributeValue::s("USER#admin"))
        .sort_key("SK", SortKeyCond::begins_with("NOTIF#"))
        .count()
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn pagination_cursor_is_byte_stable() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    for sk in ["v1", "v2", "v3"] {
        users
            .put(&User {
                pk: "U#1".into(),
                sk: sk.into(),
                nickname: sk.into(),
                ..User::default()
            })
            .await
            .unwrap();
    }

    let page = users
        .query("PK", AttributeValue::s("U#1"))
        .limit(2)
        .page()
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    // {"lastKey":{"PK":{"S":"U#1"},"SK":{"S":"v2"}},"sort":"ASC"}
    assert_eq!(
        page.cursor.as_deref(),
        Some("eyJsYXN0S2V5Ijp7IlBLIjp7IlMiOiJVIzEifSwiU0siOnsiUyI6InYyIn19LCJzb3J0IjoiQVNDIn0=")
    );

    let rest = users
        .query("PK", AttributeValue::s("U#1"))
        .start(page.cursor.unwrap())
        .page()
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.items[0].sk, "v3");
    assert!(rest.cursor.is_none());
}

#[tokio::test]
async fn all_walks_every_page() {
    let (db, store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();
    for i in 0..7 {
        users
            .put(&User {
                pk: "U#1".into(),
                sk: format!("v{i}"),
                nickname: format!("n{i}"),
                ..User::default()
            })
            .await
            .unwrap();
    }

    let all = users
        .query("PK", AttributeValue::s("U#1"))
        .limit(3)
        .all()
        .await
        .unwrap();
    assert_eq!(all.len(), 7);
    // 3 + 3 + 1 pages
    assert_eq!(store.call_count("query"), 3);
}

#[tokio::test]
async fn gsi_consistent_reads_follow_the_configured_policy() {
    use indexed::Order;
    use theorydb_core::{GsiConsistentRead, TheoryConfig};

    // Default policy: the flag is dropped and the query succeeds.
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Order>().await.unwrap();
    let orders = db.model::<Order>().unwrap();
    orders
        .put(&Order {
            pk: "O#1".into(),
            owner: "alice".into(),
            date: "2026-01-01".into(),
            total: 1,
        })
        .await
        .unwrap();
    let page = orders
        .query("owner", AttributeValue::s("alice"))
        .consistent_read(true)
        .page()
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);

    // Reject policy fails instead.
    let mut config = TheoryConfig::default();
    config.gsi_consistent_read = GsiConsistentRead::Reject;
    let (db, _store) = support::mock_db(Arc::new(FixedClock::fixture_epoch()), config);
    db.create_table::<Order>().await.unwrap();
    let orders = db.model::<Order>().unwrap();
    let err = orders
        .query("owner", AttributeValue::s("alice"))
        .consistent_read(true)
        .page()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperator);
}

#[tokio::test]
async fn first_maps_empty_pages_to_item_not_found() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<User>().await.unwrap();
    let users = db.model::<User>().unwrap();

    let err = users
        .query("PK", AttributeValue::s("U#nobody"))
        .first()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ItemNotFound);
}

#[tokio::test]
async fn filters_run_against_non_key_attributes_only() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Notification>().await.unwrap();
    seed_notifications(&db).await;
    let notifications = db.model::<Notification>().unwrap();

    let page = notifications
        .query("PK", AttributeValue::s("USER#admin"))
        .filter(Filter::contains("body", AttributeValue::s("ary")))
        .page()
        .await
        .unwrap();
    let bodies: Vec<&str> = page.items.iter().map(|n| n.body.as_str()).collect();
    assert_eq!(bodies, vec!["january", "february"]);

    let err = notifications
        .query("PK", AttributeValue::s("USER#admin"))
        .filter(Filter::eq("SK", AttributeValue::s("SETTINGS")))
        .page()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperator);
}

mod indexed {
    use serde::{Deserialize, Serialize};
    use theorydb_core::{AttributeType, Projection};
    use theorydb_schema::{Attribute, DescriptorBuilder, Model};

    /// Order-style model with a GSI keyed by owner and date.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    pub struct Order {
        pub pk: String,
        pub owner: String,
        pub date: String,
        #[serde(default)]
        pub total: i64,
    }

    impl Model for Order {
        fn descriptor() -> theorydb_core::ModelDescriptor {
            DescriptorBuilder::new("Order", "orders")
                .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
                .attribute(
                    Attribute::new("owner", AttributeType::S).index_partition("by-owner"),
                )
                .attribute(Attribute::new("date", AttributeType::S).index_sort("by-owner"))
                .attribute(Attribute::new("total", AttributeType::N))
                .global_index("by-owner", Projection::All)
                .build()
                .expect("fixture descriptor is valid")
        }
    }
}

#[tokio::test]
async fn queries_resolve_the_matching_index_from_the_predicate() {
    use indexed::Order;

    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Order>().await.unwrap();
    let orders = db.model::<Order>().unwrap();
    for (pk, date, total) in [("O#1", "2026-01-02", 10), ("O#2", "2026-01-01", 20), ("O#3", "2026-02-01", 30)] {
        orders
            .put(&Order {
                pk: pk.into(),
                owner: "alice".into(),
                date: date.into(),
                total,
            })
            .await
            .unwrap();
    }

    // No index named: the predicate on (owner, date) selects `by-owner`.
    let page = orders
        .query("owner", AttributeValue::s("alice"))
        .sort_key("date", SortKeyCond::begins_with("2026-01"))
        .page()
        .await
        .unwrap();
    let dates: Vec<&str> = page.items.iter().map(|o| o.date.as_str()).collect();
    assert_eq!(dates, vec!["2026-01-01", "2026-01-02"]);

    // Naming it explicitly works the same.
    let explicit = orders
        .query("owner", AttributeValue::s("alice"))
        .index("by-owner")
        .all()
        .await
        .unwrap();
    assert_eq!(explicit.len(), 3);
}

#[tokio::test]
async fn scan_pages_through_the_table() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Notification>().await.unwrap();
    seed_notifications(&db).await;
    let notifications = db.model::<Notification>().unwrap();

    let all = notifications.scan().all().await.unwrap();
    assert_eq!(all.len(), 4);

    // Scans have no key condition, so key attributes are allowed here.
    let filtered = notifications
        .scan()
        .filter(Filter::begins_with("SK", "NOTIF#"))
        .all()
        .await
        .unwrap();
    assert_eq!(filtered.len(), 3);
}
