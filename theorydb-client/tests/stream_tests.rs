//! Change-feed image decoding through the codec and cryptographer.

mod support;

use std::sync::Arc;
use support::{encrypted_db, plain_db};
use theorydb_client::StreamRecord;
use theorydb_core::{AttributeValue, ErrorKind};
use theorydb_test_utils::{FixedClock, Notification, Secretive};

#[tokio::test]
async fn decodes_both_images() {
    let (db, store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Notification>().await.unwrap();
    let notifications = db.model::<Notification>().unwrap();
    notifications
        .put(&Notification {
            pk: "S#1".into(),
            sk: "N#1".into(),
            body: "old".into(),
        })
        .await
        .unwrap();

    let mut key = theorydb_core::Item::new();
    key.insert("PK".into(), AttributeValue::s("S#1"));
    key.insert("SK".into(), AttributeValue::s("N#1"));
    let old_image = store.raw_item("notifications", &key).unwrap();

    notifications
        .put(&Notification {
            pk: "S#1".into(),
            sk: "N#1".into(),
            body: "new".into(),
        })
        .await
        .unwrap();
    let new_image = store.raw_item("notifications", &key).unwrap();

    let record = StreamRecord::new(Some(new_image), Some(old_image));
    let (new_typed, old_typed) = db
        .decode_stream_record::<Notification>(&record)
        .await
        .unwrap();
    assert_eq!(new_typed.unwrap().body, "new");
    assert_eq!(old_typed.unwrap().body, "old");
}

#[tokio::test]
async fn missing_images_stay_none() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    let record = StreamRecord::default();
    let (new_typed, old_typed) = db
        .decode_stream_record::<Notification>(&record)
        .await
        .unwrap();
    assert!(new_typed.is_none());
    assert!(old_typed.is_none());
}

#[tokio::test]
async fn type_mismatches_identify_the_attribute() {
    let (db, _store) = plain_db(Arc::new(FixedClock::fixture_epoch()));
    let mut image = theorydb_core::Item::new();
    image.insert("PK".into(), AttributeValue::s("S#1"));
    image.insert("SK".into(), AttributeValue::s("N#1"));
    image.insert("body".into(), AttributeValue::n(42));

    let record = StreamRecord::new(Some(image), None);
    let err = db
        .decode_stream_record::<Notification>(&record)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModel);
    assert!(err.to_string().contains("body"));
}

#[tokio::test]
async fn stream_images_decrypt_encrypted_attributes() {
    let (db, store) = encrypted_db(Arc::new(FixedClock::fixture_epoch()));
    db.create_table::<Secretive>().await.unwrap();
    let secrets = db.model::<Secretive>().unwrap();
    secrets
        .create(&Secretive {
            pk: "S#1".into(),
            secret: "hunter2".into(),
            secret2: "other".into(),
        })
        .await
        .unwrap();

    let mut key = theorydb_core::Item::new();
    key.insert("PK".into(), AttributeValue::s("S#1"));
    let image = store.raw_item("secrets", &key).unwrap();

    let record = StreamRecord::new(Some(image), None);
    let (new_typed, _) = db.decode_stream_record::<Secretive>(&record).await.unwrap();
    assert_eq!(new_typed.unwrap().secret, "hunter2");
}
