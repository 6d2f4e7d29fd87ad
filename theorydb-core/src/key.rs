//! Primary-key values.

use crate::value::AttributeValue;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// The primary-key value pair addressing one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Partition-key value
    pub partition: AttributeValue,
    /// Sort-key value, for tables with a composite key
    #[serde(default)]
    pub sort: Option<AttributeValue>,
}

impl Key {
    /// Key for a partition-only table.
    pub fn new(partition: AttributeValue) -> Self {
        Self {
            partition,
            sort: None,
        }
    }

    /// Key for a composite-key table.
    pub fn with_sort(partition: AttributeValue, sort: AttributeValue) -> Self {
        Self {
            partition,
            sort: Some(sort),
        }
    }

    /// A canonical string identity for deduplication and ordering.
    ///
    /// Key attributes are scalar (`S`, `N`, `B`), so type code plus payload
    /// is injective.
    pub fn canonical(&self) -> String {
        let mut out = canonical_component(&self.partition);
        if let Some(sort) = &self.sort {
            out.push('|');
            out.push_str(&canonical_component(sort));
        }
        out
    }
}

fn canonical_component(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) => format!("S:{s}"),
        AttributeValue::N(n) => format!("N:{n}"),
        AttributeValue::B(b) => format!("B:{}", BASE64_STD.encode(b)),
        other => format!("{}:{:?}", other.type_code(), other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_distinguishes_types_and_sort() {
        let a = Key::new(AttributeValue::s("1"));
        let b = Key::new(AttributeValue::n(1));
        assert_ne!(a.canonical(), b.canonical());

        let c = Key::with_sort(AttributeValue::s("U#1"), AttributeValue::s("PROFILE"));
        let d = Key::new(AttributeValue::s("U#1"));
        assert_ne!(c.canonical(), d.canonical());
        assert_eq!(c.canonical(), "S:U#1|S:PROFILE");
    }
}
