//! Descriptor-driven decoding of store items into language values.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use theorydb_core::{
    AttributeDescriptor, AttributeType, AttributeValue, Item, ModelDescriptor, TheoryError,
    TheoryResult,
};

/// Decode a stored item into a value of the bound type.
///
/// Attributes missing from the item materialize as the declared type's zero
/// value; attributes present in the item but absent from the descriptor are
/// dropped. The result shares no storage with the input.
pub fn decode<T: DeserializeOwned>(descriptor: &ModelDescriptor, item: &Item) -> TheoryResult<T> {
    let json = decode_item(descriptor, item)?;
    serde_json::from_value(json).map_err(|e| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!("decoded item does not fit the bound type: {e}"),
    })
}

/// Decode a stored item into its serialized (JSON) form.
pub fn decode_item(descriptor: &ModelDescriptor, item: &Item) -> TheoryResult<Value> {
    let mut out = Map::new();
    for attr in &descriptor.attributes {
        let value = match item.get(&attr.attribute) {
            Some(stored) => convert(descriptor, attr, stored)?,
            None => zero_value(attr),
        };
        out.insert(attr.field.clone(), value);
    }
    Ok(Value::Object(out))
}

/// The serialized zero value for a missing attribute.
fn zero_value(attr: &AttributeDescriptor) -> Value {
    if attr.modifiers.json {
        return Value::Null;
    }
    match attr.attr_type {
        AttributeType::S => {
            if attr.format.is_some() {
                // Timestamp-like fields bind to Option or chrono types;
                // an empty string satisfies neither.
                Value::Null
            } else {
                Value::String(String::new())
            }
        }
        AttributeType::N => Value::Number(0.into()),
        AttributeType::B => Value::Array(vec![]),
        AttributeType::Bool => Value::Bool(false),
        AttributeType::Null => Value::Null,
        AttributeType::M => Value::Object(Map::new()),
        AttributeType::L | AttributeType::Ss | AttributeType::Ns | AttributeType::Bs => {
            Value::Array(vec![])
        }
    }
}

fn convert(
    descriptor: &ModelDescriptor,
    attr: &AttributeDescriptor,
    stored: &AttributeValue,
) -> TheoryResult<Value> {
    let mismatch = || TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!(
            "attribute {:?} is declared {} but stored as {}",
            attr.attribute,
            attr.attr_type.code(),
            stored.type_code()
        ),
    };

    // A stored NULL decodes as null for any declared type.
    if matches!(stored, AttributeValue::Null) {
        return Ok(Value::Null);
    }

    if attr.modifiers.json {
        return match stored {
            AttributeValue::S(s) => {
                serde_json::from_str(s).map_err(|e| TheoryError::InvalidModel {
                    model: descriptor.name.clone(),
                    reason: format!("attribute {:?} holds malformed JSON: {e}", attr.attribute),
                })
            }
            _ => Err(mismatch()),
        };
    }
    if attr.modifiers.binary || attr.attr_type == AttributeType::B {
        return match stored {
            AttributeValue::B(b) => Ok(bytes_to_json(b)),
            _ => Err(mismatch()),
        };
    }

    match (attr.attr_type, stored) {
        (AttributeType::S, AttributeValue::S(s)) => Ok(Value::String(s.clone())),
        (AttributeType::N, AttributeValue::N(n)) => number_to_json(descriptor, attr, n),
        (AttributeType::Bool, AttributeValue::Bool(b)) => Ok(Value::Bool(*b)),
        (AttributeType::M, AttributeValue::M(m)) => {
            let mut out = Map::new();
            for (k, v) in m {
                out.insert(k.clone(), infer(v));
            }
            Ok(Value::Object(out))
        }
        (AttributeType::L, AttributeValue::L(items)) => {
            Ok(Value::Array(items.iter().map(infer).collect()))
        }
        (AttributeType::Ss, AttributeValue::Ss(items)) => Ok(Value::Array(
            items.iter().map(|s| Value::String(s.clone())).collect(),
        )),
        (AttributeType::Ns, AttributeValue::Ns(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(number_to_json(descriptor, attr, item)?);
            }
            Ok(Value::Array(out))
        }
        (AttributeType::Bs, AttributeValue::Bs(items)) => {
            Ok(Value::Array(items.iter().map(|b| bytes_to_json(b)).collect()))
        }
        _ => Err(mismatch()),
    }
}

/// Schemaless conversion for members of nested maps and lists.
fn infer(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n).unwrap_or_else(|| Value::String(n.clone())),
        AttributeValue::B(b) => bytes_to_json(b),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null => Value::Null,
        AttributeValue::M(m) => {
            let mut out = Map::new();
            for (k, v) in m {
                out.insert(k.clone(), infer(v));
            }
            Value::Object(out)
        }
        AttributeValue::L(items) => Value::Array(items.iter().map(infer).collect()),
        AttributeValue::Ss(items) => Value::Array(
            items.iter().map(|s| Value::String(s.clone())).collect(),
        ),
        AttributeValue::Ns(items) => Value::Array(
            items
                .iter()
                .map(|n| parse_number(n).unwrap_or_else(|| Value::String(n.clone())))
                .collect(),
        ),
        AttributeValue::Bs(items) => Value::Array(items.iter().map(|b| bytes_to_json(b)).collect()),
    }
}

fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::Number((*b).into())).collect())
}

fn number_to_json(
    descriptor: &ModelDescriptor,
    attr: &AttributeDescriptor,
    n: &str,
) -> TheoryResult<Value> {
    parse_number(n).ok_or_else(|| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!("attribute {:?} holds a malformed number {n:?}", attr.attribute),
    })
}

fn parse_number(n: &str) -> Option<Value> {
    if let Ok(i) = n.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Ok(u) = n.parse::<u64>() {
        return Some(Value::Number(u.into()));
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use theorydb_schema::{Attribute, DescriptorBuilder};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        pk: String,
        display_name: String,
        score: i64,
        labels: Vec<String>,
        settings: BTreeMap<String, String>,
        active: bool,
    }

    fn profile_descriptor() -> ModelDescriptor {
        DescriptorBuilder::new("Profile", "profiles")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("display_name", AttributeType::S))
            .attribute(Attribute::new("score", AttributeType::N))
            .attribute(Attribute::new("labels", AttributeType::Ss).omit_empty())
            .attribute(Attribute::new("settings", AttributeType::M).omit_empty())
            .attribute(Attribute::new("active", AttributeType::Bool))
            .build()
            .unwrap()
    }

    fn profile() -> Profile {
        Profile {
            pk: "p#1".into(),
            display_name: "Al".into(),
            score: 9,
            labels: vec!["alpha".into(), "beta".into()],
            settings: [("theme".to_string(), "dark".to_string())].into(),
            active: true,
        }
    }

    #[test]
    fn round_trip_preserves_value() {
        let descriptor = profile_descriptor();
        let original = profile();
        let encoded = encode(&descriptor, &original).unwrap();
        let back: Profile = decode(&descriptor, &encoded.item).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn missing_attributes_decode_to_zero_values() {
        let descriptor = profile_descriptor();
        let mut item = Item::new();
        item.insert("PK".into(), AttributeValue::s("p#2"));
        let decoded: Profile = decode(&descriptor, &item).unwrap();
        assert_eq!(decoded.display_name, "");
        assert_eq!(decoded.score, 0);
        assert!(decoded.labels.is_empty());
        assert!(decoded.settings.is_empty());
        assert!(!decoded.active);
    }

    #[test]
    fn unknown_attributes_are_dropped() {
        let descriptor = profile_descriptor();
        let encoded = encode(&descriptor, &profile()).unwrap();
        let mut item = encoded.item;
        item.insert("legacy".into(), AttributeValue::s("ignored"));
        let decoded: Profile = decode(&descriptor, &item).unwrap();
        assert_eq!(decoded, profile());
    }

    #[test]
    fn type_mismatch_identifies_attribute() {
        let descriptor = profile_descriptor();
        let mut item = Item::new();
        item.insert("PK".into(), AttributeValue::s("p#1"));
        item.insert("score".into(), AttributeValue::s("not-a-number"));
        let err = decode::<Profile>(&descriptor, &item).unwrap_err();
        assert!(err.to_string().contains("score"));
    }

    #[test]
    fn numbers_keep_precision_paths() {
        assert_eq!(parse_number("42"), Some(Value::Number(42.into())));
        assert_eq!(
            parse_number("18446744073709551615"),
            Some(Value::Number(u64::MAX.into()))
        );
        let float = parse_number("2.5").unwrap();
        assert_eq!(float.as_f64(), Some(2.5));
        assert_eq!(parse_number("not-a-number"), None);
    }
}
