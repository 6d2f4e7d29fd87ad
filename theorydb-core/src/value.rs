//! Typed attribute values for the document store's item model.
//!
//! An item is a map from attribute name to [`AttributeValue`]. The serde
//! representation of an `AttributeValue` is the store's wire JSON: exactly
//! one key per value (`{"S": …}`, `{"N": …}`, `{"B": "<base64>"}`,
//! `{"BOOL": …}`, `{"NULL": true}`, `{"M": …}`, `{"L": …}`, `{"SS": …}`,
//! `{"NS": …}`, `{"BS": …}`). Binary payloads are base64 (standard
//! alphabet) in JSON form and raw bytes in memory.

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use bytes::Bytes;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A stored item: attribute name to typed value.
///
/// `BTreeMap` keeps attribute iteration deterministic, which the canonical
/// JSON and cursor contracts rely on.
pub type Item = BTreeMap<String, AttributeValue>;

/// A typed attribute value in the store's item model.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    /// String
    S(String),
    /// Number, kept as its decimal string rendering
    N(String),
    /// Binary
    B(Bytes),
    /// Boolean
    Bool(bool),
    /// Null
    Null,
    /// Map of nested attribute values
    M(BTreeMap<String, AttributeValue>),
    /// List of nested attribute values
    L(Vec<AttributeValue>),
    /// String set
    Ss(Vec<String>),
    /// Number set
    Ns(Vec<String>),
    /// Binary set
    Bs(Vec<Bytes>),
}

impl AttributeValue {
    /// String value.
    pub fn s(v: impl Into<String>) -> Self {
        AttributeValue::S(v.into())
    }

    /// Number value from anything with a decimal rendering.
    pub fn n(v: impl ToString) -> Self {
        AttributeValue::N(v.to_string())
    }

    /// Binary value.
    pub fn b(v: impl Into<Bytes>) -> Self {
        AttributeValue::B(v.into())
    }

    /// Boolean value.
    pub fn bool(v: bool) -> Self {
        AttributeValue::Bool(v)
    }

    /// The wire type code (`S`, `N`, `B`, `BOOL`, `NULL`, `M`, `L`, `SS`,
    /// `NS`, `BS`).
    pub fn type_code(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null => "NULL",
            AttributeValue::M(_) => "M",
            AttributeValue::L(_) => "L",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
        }
    }

    /// Borrow the string payload, if this is an `S`.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the decimal string payload, if this is an `N`.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    /// Borrow the binary payload, if this is a `B`.
    pub fn as_b(&self) -> Option<&Bytes> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the nested map, if this is an `M`.
    pub fn as_m(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }

    /// Parse the number payload as `i64`, if this is an `N` holding one.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_n().and_then(|n| n.parse().ok())
    }

    /// Whether this value is empty under the write-side emptiness rules.
    ///
    /// Empty: null, empty string, numeric zero, `false`, empty binary,
    /// empty list/set, and a map whose every member is empty (an empty map
    /// included). A list with members is never empty, whatever the members
    /// hold.
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::S(s) => s.is_empty(),
            AttributeValue::N(n) => n.parse::<f64>().map(|f| f == 0.0).unwrap_or(false),
            AttributeValue::B(b) => b.is_empty(),
            AttributeValue::Bool(b) => !b,
            AttributeValue::Null => true,
            AttributeValue::M(m) => m.values().all(AttributeValue::is_empty),
            AttributeValue::L(l) => l.is_empty(),
            AttributeValue::Ss(s) => s.is_empty(),
            AttributeValue::Ns(s) => s.is_empty(),
            AttributeValue::Bs(s) => s.is_empty(),
        }
    }

    /// Whether this is one of the set types (`SS`, `NS`, `BS`).
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)
        )
    }
}

fn set_eq<T: Eq + Ord + Clone>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

impl PartialEq for AttributeValue {
    /// Structural equality; set members compare order-insensitively.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::S(a), AttributeValue::S(b)) => a == b,
            (AttributeValue::N(a), AttributeValue::N(b)) => a == b,
            (AttributeValue::B(a), AttributeValue::B(b)) => a == b,
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::Null, AttributeValue::Null) => true,
            (AttributeValue::M(a), AttributeValue::M(b)) => a == b,
            (AttributeValue::L(a), AttributeValue::L(b)) => a == b,
            (AttributeValue::Ss(a), AttributeValue::Ss(b)) => set_eq(a, b),
            (AttributeValue::Ns(a), AttributeValue::Ns(b)) => set_eq(a, b),
            (AttributeValue::Bs(a), AttributeValue::Bs(b)) => set_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            AttributeValue::S(s) => map.serialize_entry("S", s)?,
            AttributeValue::N(n) => map.serialize_entry("N", n)?,
            AttributeValue::B(b) => map.serialize_entry("B", &BASE64_STD.encode(b))?,
            AttributeValue::Bool(b) => map.serialize_entry("BOOL", b)?,
            AttributeValue::Null => map.serialize_entry("NULL", &true)?,
            AttributeValue::M(m) => map.serialize_entry("M", m)?,
            AttributeValue::L(l) => map.serialize_entry("L", l)?,
            AttributeValue::Ss(s) => map.serialize_entry("SS", s)?,
            AttributeValue::Ns(s) => map.serialize_entry("NS", s)?,
            AttributeValue::Bs(s) => {
                let encoded: Vec<String> = s.iter().map(|b| BASE64_STD.encode(b)).collect();
                map.serialize_entry("BS", &encoded)?;
            }
        }
        map.end()
    }
}

struct AvVisitor;

impl<'de> Visitor<'de> for AvVisitor {
    type Value = AttributeValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with exactly one attribute type key")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let key: String = access
            .next_key()?
            .ok_or_else(|| de::Error::custom("attribute value map is empty"))?;
        let value = match key.as_str() {
            "S" => AttributeValue::S(access.next_value()?),
            "N" => AttributeValue::N(access.next_value()?),
            "B" => {
                let encoded: String = access.next_value()?;
                let bytes = BASE64_STD
                    .decode(&encoded)
                    .map_err(|e| de::Error::custom(format!("invalid base64 in B: {e}")))?;
                AttributeValue::B(Bytes::from(bytes))
            }
            "BOOL" => AttributeValue::Bool(access.next_value()?),
            "NULL" => {
                let _: bool = access.next_value()?;
                AttributeValue::Null
            }
            "M" => AttributeValue::M(access.next_value()?),
            "L" => AttributeValue::L(access.next_value()?),
            "SS" => AttributeValue::Ss(access.next_value()?),
            "NS" => AttributeValue::Ns(access.next_value()?),
            "BS" => {
                let encoded: Vec<String> = access.next_value()?;
                let mut decoded = Vec::with_capacity(encoded.len());
                for item in encoded {
                    let bytes = BASE64_STD
                        .decode(&item)
                        .map_err(|e| de::Error::custom(format!("invalid base64 in BS: {e}")))?;
                    decoded.push(Bytes::from(bytes));
                }
                AttributeValue::Bs(decoded)
            }
            other => {
                return Err(de::Error::custom(format!(
                    "unknown attribute type key: {other}"
                )))
            }
        };
        if access.next_key::<String>()?.is_some() {
            return Err(de::Error::custom(
                "attribute value map has more than one key",
            ));
        }
        Ok(value)
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AvVisitor)
    }
}
