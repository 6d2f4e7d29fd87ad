//! Empty-value semantics on update: omit_empty attributes keep their
//! stored value when the caller writes an empty collection.

mod support;

use std::sync::Arc;
use support::plain_db;
use theorydb_core::AttributeValue;
use theorydb_expr::Update;
use theorydb_test_utils::{FixedClock, Payment};

fn seeded() -> Payment {
    Payment {
        pk: "pmt#1".into(),
        sk: "token#1".into(),
        tokens: vec!["tok_123".into()],
        attrs: [("stripe".to_string(), "tok_123".to_string())].into(),
        payload: "enc_v1".into(),
    }
}

#[tokio::test]
async fn empty_collections_leave_omit_empty_attributes_untouched() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Payment>().await.unwrap();
    let payments = db.model::<Payment>().unwrap();

    payments.put(&seeded()).await.unwrap();

    payments
        .update(
            Payment::key("pmt#1", "token#1"),
            Update::new()
                .set("tokens", AttributeValue::L(vec![]))
                .set(
                    "attrs",
                    AttributeValue::M(std::collections::BTreeMap::new()),
                )
                .set("payload", AttributeValue::s("enc_v2")),
        )
        .exec()
        .await
        .unwrap();

    let stored = payments.get(Payment::key("pmt#1", "token#1")).await.unwrap();
    assert_eq!(stored.tokens, vec!["tok_123".to_string()]);
    assert_eq!(stored.attrs.get("stripe").map(String::as_str), Some("tok_123"));
    assert_eq!(stored.payload, "enc_v2");
}

#[tokio::test]
async fn non_empty_collections_still_replace() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Payment>().await.unwrap();
    let payments = db.model::<Payment>().unwrap();
    payments.put(&seeded()).await.unwrap();

    payments
        .update(
            Payment::key("pmt#1", "token#1"),
            Update::new().set(
                "tokens",
                AttributeValue::L(vec![AttributeValue::s("tok_456")]),
            ),
        )
        .exec()
        .await
        .unwrap();

    let stored = payments.get(Payment::key("pmt#1", "token#1")).await.unwrap();
    assert_eq!(stored.tokens, vec!["tok_456".to_string()]);
}

#[tokio::test]
async fn puts_omit_empty_collections_from_the_payload() {
    let (db, store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Payment>().await.unwrap();
    let payments = db.model::<Payment>().unwrap();

    let mut value = seeded();
    value.tokens.clear();
    value.attrs.clear();
    payments.put(&value).await.unwrap();

    let raw = store
        .raw_item("payments", &{
            let mut key = theorydb_core::Item::new();
            key.insert("PK".into(), AttributeValue::s("pmt#1"));
            key.insert("SK".into(), AttributeValue::s("token#1"));
            key
        })
        .expect("item stored");
    assert!(!raw.contains_key("tokens"));
    assert!(!raw.contains_key("attrs"));
    assert_eq!(raw["payload"], AttributeValue::s("enc_v1"));
}
