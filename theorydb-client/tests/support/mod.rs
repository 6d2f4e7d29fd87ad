//! Shared wiring for the integration suites: a session over `MockStore`
//! with deterministic clock and randomness.

#![allow(dead_code)]

use std::sync::Arc;
use theorydb_client::{Clock, MockStore, TheoryDb};
use theorydb_core::TheoryConfig;
use theorydb_test_utils::{MockKeyService, ZeroRandom};

pub fn mock_db(clock: Arc<dyn Clock>, config: TheoryConfig) -> (TheoryDb, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let db = TheoryDb::builder()
        .store(store.clone())
        .clock(clock)
        .random(Arc::new(ZeroRandom))
        .config(config)
        .build()
        .expect("session assembles");
    (db, store)
}

pub fn plain_db(clock: Arc<dyn Clock>) -> (TheoryDb, Arc<MockStore>) {
    mock_db(clock, TheoryConfig::default())
}

/// A session with envelope encryption configured against the mock key
/// service.
pub fn encrypted_db(clock: Arc<dyn Clock>) -> (TheoryDb, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let config = TheoryConfig::default()
        .with_kms_key_arn("arn:aws:kms:us-east-1:000000000000:key/fixture");
    let db = TheoryDb::builder()
        .store(store.clone())
        .clock(clock)
        .random(Arc::new(ZeroRandom))
        .key_service(Arc::new(MockKeyService::new()))
        .config(config)
        .build()
        .expect("session assembles");
    (db, store)
}
