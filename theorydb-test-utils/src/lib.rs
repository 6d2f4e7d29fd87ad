//! TheoryDB Test Utilities
//!
//! Centralized test infrastructure for the workspace:
//! - the in-memory `MockStore` (re-exported from its source crate)
//! - a deterministic key service for envelope encryption
//! - pinned and stepping clocks, seeded randomness
//! - model fixtures shared by the integration suites
//! - proptest generators for attribute values

// Re-export the mock store from its source crate
pub use theorydb_client::MockStore;

// Re-export the types suites reach for constantly
pub use theorydb_core::{
    AttributeType, AttributeValue, ErrorKind, Filter, Item, Key, SortDirection, SortKeyCond,
    TheoryConfig, TheoryError, TheoryResult,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use theorydb_client::Clock;
use theorydb_crypto::{DataKey, KeyService, RandomSource};
use theorydb_schema::{Attribute, DescriptorBuilder, Model};

// ============================================================================
// DETERMINISTIC KEY SERVICE
// ============================================================================

/// Key service wrapping data keys by XOR with a fixed pad. Deterministic,
/// reversible, and stateless, so envelope tests need no KMS.
#[derive(Debug, Clone, Default)]
pub struct MockKeyService {
    /// When set, every call fails; exercises fail-closed paths.
    pub refuse: bool,
}

const WRAP_PAD: u8 = 0x5a;

impl MockKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self { refuse: true }
    }
}

#[async_trait]
impl KeyService for MockKeyService {
    async fn generate_data_key(&self, key_ref: &str) -> TheoryResult<DataKey> {
        if self.refuse {
            return Err(TheoryError::InternalStoreError {
                code: Some("KMS".into()),
                message: "key service refused".into(),
            });
        }
        // Derive the key bytes from the key reference so distinct
        // references produce distinct keys.
        let seed = key_ref.bytes().fold(7u8, |acc, b| acc.wrapping_add(b));
        let plaintext = vec![seed; 32];
        let encrypted: Vec<u8> = plaintext.iter().map(|b| b ^ WRAP_PAD).collect();
        Ok(DataKey {
            plaintext: Bytes::from(plaintext),
            encrypted: Bytes::from(encrypted),
        })
    }

    async fn decrypt_data_key(&self, _key_ref: &str, encrypted: &[u8]) -> TheoryResult<Bytes> {
        if self.refuse {
            return Err(TheoryError::InternalStoreError {
                code: Some("KMS".into()),
                message: "key service refused".into(),
            });
        }
        Ok(Bytes::from(
            encrypted.iter().map(|b| b ^ WRAP_PAD).collect::<Vec<u8>>(),
        ))
    }
}

// ============================================================================
// CLOCKS
// ============================================================================

/// A clock pinned to one instant until moved.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Pinned to `2026-01-01T00:00:00Z`, the fixture epoch.
    pub fn fixture_epoch() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Advance by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += ChronoDuration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A clock that steps forward one second on every read; distinct
/// timestamps without real time.
#[derive(Debug)]
pub struct StepClock {
    next: Mutex<DateTime<Utc>>,
}

impl StepClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let now = *next;
        *next += ChronoDuration::seconds(1);
        now
    }
}

// ============================================================================
// SEEDED RANDOMNESS
// ============================================================================

/// Randomness from a seeded PRNG; nonces and backoff jitter become
/// reproducible.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill(&self, buf: &mut [u8]) {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fill_bytes(buf);
    }
}

/// Randomness pinned to zero; backoff sleeps collapse to zero wait, so
/// retry tests run instantly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroRandom;

impl RandomSource for ZeroRandom {
    fn fill(&self, buf: &mut [u8]) {
        buf.fill(0);
    }
}

// ============================================================================
// MODEL FIXTURES
// ============================================================================

/// Profile-style model with the full lifecycle set: composite key,
/// version, both timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct User {
    pub pk: String,
    pub sk: String,
    pub nickname: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Model for User {
    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("User", "users")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(Attribute::new("nickname", AttributeType::S))
            .attribute(Attribute::new("version", AttributeType::N).version())
            .attribute(Attribute::new("created_at", AttributeType::S).created_at())
            .attribute(Attribute::new("updated_at", AttributeType::S).updated_at())
            .build()
            .expect("fixture descriptor is valid")
    }
}

impl User {
    pub fn key(pk: &str, sk: &str) -> Key {
        Key::with_sort(AttributeValue::s(pk), AttributeValue::s(sk))
    }
}

/// Payment-style model with collection attributes under `omit_empty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payment {
    pub pk: String,
    pub sk: String,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: String,
}

impl Model for Payment {
    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Payment", "payments")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(Attribute::new("tokens", AttributeType::L).omit_empty())
            .attribute(Attribute::new("attrs", AttributeType::M).omit_empty())
            .attribute(Attribute::new("payload", AttributeType::S))
            .build()
            .expect("fixture descriptor is valid")
    }
}

impl Payment {
    pub fn key(pk: &str, sk: &str) -> Key {
        Key::with_sort(AttributeValue::s(pk), AttributeValue::s(sk))
    }
}

/// Notification-style model: composite key only, queried by prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Notification {
    pub pk: String,
    pub sk: String,
    #[serde(default)]
    pub body: String,
}

impl Model for Notification {
    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Notification", "notifications")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(Attribute::new("body", AttributeType::S))
            .build()
            .expect("fixture descriptor is valid")
    }
}

/// Model carrying two encrypted attributes for envelope tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Secretive {
    pub pk: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub secret2: String,
}

impl Model for Secretive {
    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Secretive", "secrets")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("secret", AttributeType::S).encrypted())
            .attribute(Attribute::new("secret2", AttributeType::S).encrypted())
            .build()
            .expect("fixture descriptor is valid")
    }
}

impl Secretive {
    pub fn key(pk: &str) -> Key {
        Key::new(AttributeValue::s(pk))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Scalar attribute values (no sets, no nesting).
pub fn arb_scalar() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[ -~]{0,24}".prop_map(AttributeValue::s),
        any::<i64>().prop_map(AttributeValue::n),
        any::<bool>().prop_map(AttributeValue::Bool),
        proptest::collection::vec(any::<u8>(), 0..16)
            .prop_map(|b| AttributeValue::B(Bytes::from(b))),
        Just(AttributeValue::Null),
    ]
}

/// Attribute values including one level of lists, maps, and sets.
pub fn arb_value() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        arb_scalar(),
        proptest::collection::vec(arb_scalar(), 0..4).prop_map(AttributeValue::L),
        proptest::collection::btree_map("[a-z]{1,8}", arb_scalar(), 0..4)
            .prop_map(AttributeValue::M),
        proptest::collection::btree_set("[a-z]{1,8}", 1..4)
            .prop_map(|s| AttributeValue::Ss(s.into_iter().collect())),
        proptest::collection::btree_set(any::<i32>(), 1..4)
            .prop_map(|s| AttributeValue::Ns(s.into_iter().map(|n| n.to_string()).collect())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        /// The wire JSON of any attribute value parses back to an equal
        /// value (set members order-insensitively).
        #[test]
        fn wire_json_round_trips(value in arb_value()) {
            let json = serde_json::to_string(&value).unwrap();
            let back: AttributeValue = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, value);
        }
    }

    #[test]
    fn step_clock_strictly_advances() {
        let clock = StepClock::starting_at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let first = clock.now();
        let second = clock.now();
        assert!(second > first);
    }

    #[tokio::test]
    async fn mock_key_service_round_trips() {
        let keys = MockKeyService::new();
        let data_key = keys.generate_data_key("arn:test").await.unwrap();
        let unwrapped = keys
            .decrypt_data_key("arn:test", &data_key.encrypted)
            .await
            .unwrap();
        assert_eq!(unwrapped, data_key.plaintext);
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let mut buf_a = [0u8; 16];
        let mut buf_b = [0u8; 16];
        a.fill(&mut buf_a);
        b.fill(&mut buf_b);
        assert_eq!(buf_a, buf_b);
    }
}
