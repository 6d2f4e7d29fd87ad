//! Opaque pagination cursors.
//!
//! A cursor is `base64url(canonical_json(cursor))` with the RFC 4648 URL
//! alphabet, padded. Top-level key order is fixed (`lastKey`, then `index`
//! if present, then `sort` if present); every nested map is sorted. This is
//! a byte-level contract: any two implementations must produce identical
//! tokens for identical inputs.

use crate::canonical::canonical_json;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use theorydb_core::{Item, SortDirection, TheoryError, TheoryResult};

/// A pagination position: the last evaluated key plus the query shape
/// needed to resume it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Last evaluated key of the previous page
    pub last_key: Item,
    /// Index the query ran against, if not the base table
    pub index: Option<String>,
    /// Sort direction of the query
    pub sort: Option<SortDirection>,
}

#[derive(Serialize, Deserialize)]
struct WireCursor {
    #[serde(rename = "lastKey")]
    last_key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<SortDirection>,
}

impl Cursor {
    pub fn new(last_key: Item) -> Self {
        Self {
            last_key,
            index: None,
            sort: None,
        }
    }

    /// Render the canonical token.
    pub fn encode(&self) -> String {
        let mut json = String::from("{\"lastKey\":");
        let last_key =
            serde_json::to_value(&self.last_key).expect("attribute values serialize infallibly");
        json.push_str(&canonical_json(&last_key));
        if let Some(index) = &self.index {
            json.push_str(",\"index\":");
            json.push_str(&canonical_json(&serde_json::Value::String(index.clone())));
        }
        if let Some(sort) = &self.sort {
            json.push_str(match sort {
                SortDirection::Asc => ",\"sort\":\"ASC\"",
                SortDirection::Desc => ",\"sort\":\"DESC\"",
            });
        }
        json.push('}');
        URL_SAFE.encode(json.as_bytes())
    }

    /// Parse a token produced by [`Cursor::encode`].
    pub fn decode(token: &str) -> TheoryResult<Self> {
        let invalid = |reason: String| TheoryError::InvalidModel {
            model: "Cursor".into(),
            reason,
        };
        let bytes = URL_SAFE
            .decode(token)
            .map_err(|e| invalid(format!("cursor is not valid base64url: {e}")))?;
        let wire: WireCursor = serde_json::from_slice(&bytes)
            .map_err(|e| invalid(format!("cursor payload is malformed: {e}")))?;
        Ok(Self {
            last_key: wire.last_key,
            index: wire.index,
            sort: wire.sort,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;
    use theorydb_core::AttributeValue;

    fn user_cursor() -> Cursor {
        let mut last_key = Item::new();
        last_key.insert("PK".into(), AttributeValue::s("U#1"));
        last_key.insert("SK".into(), AttributeValue::s("v2"));
        Cursor {
            last_key,
            index: None,
            sort: Some(SortDirection::Asc),
        }
    }

    #[test]
    fn golden_token_without_index() {
        // {"lastKey":{"PK":{"S":"U#1"},"SK":{"S":"v2"}},"sort":"ASC"}
        assert_eq!(
            user_cursor().encode(),
            "eyJsYXN0S2V5Ijp7IlBLIjp7IlMiOiJVIzEifSwiU0siOnsiUyI6InYyIn19LCJzb3J0IjoiQVNDIn0="
        );
    }

    #[test]
    fn golden_token_with_index_and_desc() {
        let mut last_key = Item::new();
        last_key.insert("PK".into(), AttributeValue::s("batch-large"));
        last_key.insert("SK".into(), AttributeValue::s("item-0042"));
        let cursor = Cursor {
            last_key,
            index: Some("by-email".into()),
            sort: Some(SortDirection::Desc),
        };
        assert_eq!(
            cursor.encode(),
            "eyJsYXN0S2V5Ijp7IlBLIjp7IlMiOiJiYXRjaC1sYXJnZSJ9LCJTSyI6eyJTIjoiaXRlbS0wMDQyIn19LCJpbmRleCI6ImJ5LWVtYWlsIiwic29ydCI6IkRFU0MifQ=="
        );
    }

    #[test]
    fn golden_token_with_numeric_and_binary_key() {
        let mut last_key = Item::new();
        last_key.insert("id".into(), AttributeValue::n(17));
        last_key.insert(
            "payload".into(),
            AttributeValue::B(Bytes::from_static(&[1, 2, 3])),
        );
        let cursor = Cursor {
            last_key,
            index: None,
            sort: None,
        };
        assert_eq!(
            cursor.encode(),
            "eyJsYXN0S2V5Ijp7ImlkIjp7Ik4iOiIxNyJ9LCJwYXlsb2FkIjp7IkIiOiJBUUlEIn19fQ=="
        );
    }

    #[test]
    fn round_trip_preserves_types() {
        let cursor = user_cursor();
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert_eq!(
            decoded.last_key["PK"],
            AttributeValue::s("U#1")
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(Cursor::decode("not-base64!!").is_err());
        let garbage = URL_SAFE.encode(b"{\"lastKey\":3}");
        assert!(Cursor::decode(&garbage).is_err());
    }

    proptest! {
        #[test]
        fn round_trips_for_arbitrary_string_keys(pk in "[ -~]{1,32}", sk in "[ -~]{0,32}") {
            let mut last_key = Item::new();
            last_key.insert("PK".into(), AttributeValue::s(pk));
            if !sk.is_empty() {
                last_key.insert("SK".into(), AttributeValue::s(sk));
            }
            let cursor = Cursor { last_key, index: None, sort: Some(SortDirection::Desc) };
            let decoded = Cursor::decode(&cursor.encode()).unwrap();
            prop_assert_eq!(decoded, cursor);
        }
    }
}
