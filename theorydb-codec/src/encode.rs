//! Descriptor-driven encoding of language values into store items.

use crate::canonical::canonical_json;
use bytes::Bytes;
use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use theorydb_core::{
    AttributeDescriptor, AttributeFormat, AttributeType, AttributeValue, Item, Key,
    ModelDescriptor, TheoryError, TheoryResult,
};

/// Result of encoding one value: the write payload plus the attributes the
/// payload does not contain (absent or omitted-empty).
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedItem {
    pub item: Item,
    pub missing: BTreeSet<String>,
}

/// Encode a value under its descriptor.
pub fn encode<T: Serialize>(descriptor: &ModelDescriptor, value: &T) -> TheoryResult<EncodedItem> {
    let json = serde_json::to_value(value).map_err(|e| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!("value failed to serialize: {e}"),
    })?;
    encode_to_item(descriptor, &json)
}

/// Encode an already-serialized value under its descriptor.
pub fn encode_to_item(descriptor: &ModelDescriptor, json: &Value) -> TheoryResult<EncodedItem> {
    let obj = json.as_object().ok_or_else(|| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!("model value must serialize to a map, got {}", type_name(json)),
    })?;

    let mut item = BTreeMap::new();
    let mut missing = BTreeSet::new();
    for attr in &descriptor.attributes {
        let raw = obj.get(&attr.field).unwrap_or(&Value::Null);
        let empty = json_is_empty(raw);

        if empty && attr.modifiers.required {
            return Err(TheoryError::InvalidModel {
                model: descriptor.name.clone(),
                reason: format!("required attribute {:?} is empty", attr.attribute),
            });
        }
        if empty && attr.modifiers.omit_empty {
            missing.insert(attr.attribute.clone());
            continue;
        }

        let value = convert(descriptor, attr, raw)?;

        // The store rejects empty sets; they are omitted no matter what.
        if value.is_set() && value.is_empty() {
            missing.insert(attr.attribute.clone());
            continue;
        }

        item.insert(attr.attribute.clone(), value);
    }
    Ok(EncodedItem { item, missing })
}

/// Extract the primary key from an encoded item.
pub fn item_key(descriptor: &ModelDescriptor, item: &Item) -> TheoryResult<Key> {
    let partition = item
        .get(&descriptor.keys.partition)
        .cloned()
        .ok_or_else(|| TheoryError::MissingPrimaryKey {
            model: descriptor.name.clone(),
            attribute: descriptor.keys.partition.clone(),
        })?;
    let sort = match &descriptor.keys.sort {
        Some(name) => Some(item.get(name).cloned().ok_or_else(|| {
            TheoryError::MissingPrimaryKey {
                model: descriptor.name.clone(),
                attribute: name.clone(),
            }
        })?),
        None => None,
    };
    Ok(Key { partition, sort })
}

/// Render a key as the key-only item map the store expects.
pub fn key_item(descriptor: &ModelDescriptor, key: &Key) -> TheoryResult<Item> {
    let mut item = BTreeMap::new();
    item.insert(descriptor.keys.partition.clone(), key.partition.clone());
    match (&descriptor.keys.sort, &key.sort) {
        (Some(name), Some(value)) => {
            item.insert(name.clone(), value.clone());
        }
        (Some(name), None) => {
            return Err(TheoryError::MissingPrimaryKey {
                model: descriptor.name.clone(),
                attribute: name.clone(),
            })
        }
        (None, _) => {}
    }
    Ok(item)
}

/// Emptiness of a serialized value: null, empty string, numeric zero,
/// `false`, empty array, and an object whose every member is empty.
fn json_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(json_is_empty),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn convert(
    descriptor: &ModelDescriptor,
    attr: &AttributeDescriptor,
    raw: &Value,
) -> TheoryResult<AttributeValue> {
    let mismatch = |expected: &str| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!(
            "attribute {:?} expects {expected}, got {}",
            attr.attribute,
            type_name(raw)
        ),
    };

    if attr.modifiers.json {
        // `null` is stored as attribute NULL, never the string "null".
        return Ok(match raw {
            Value::Null => AttributeValue::Null,
            other => AttributeValue::S(canonical_json(other)),
        });
    }
    if raw.is_null() {
        // An absent or nil value is typeless; it is stored as NULL unless
        // omit_empty dropped it above.
        return Ok(AttributeValue::Null);
    }
    if attr.modifiers.binary || attr.attr_type == AttributeType::B {
        return Ok(AttributeValue::B(bytes_from_json(descriptor, attr, raw)?));
    }
    if attr.format == Some(AttributeFormat::UnixSeconds) {
        return Ok(AttributeValue::N(epoch_seconds(descriptor, attr, raw)?.to_string()));
    }

    match attr.attr_type {
        AttributeType::S => match raw {
            Value::String(s) => Ok(AttributeValue::S(s.clone())),
            _ => Err(mismatch("a string")),
        },
        AttributeType::N => match raw {
            Value::Number(n) => Ok(AttributeValue::N(n.to_string())),
            _ => Err(mismatch("a number")),
        },
        AttributeType::Bool => match raw {
            Value::Bool(b) => Ok(AttributeValue::Bool(*b)),
            _ => Err(mismatch("a boolean")),
        },
        AttributeType::Null => match raw {
            Value::Null => Ok(AttributeValue::Null),
            _ => Err(mismatch("null")),
        },
        AttributeType::M => match raw {
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), infer(v));
                }
                Ok(AttributeValue::M(out))
            }
            _ => Err(mismatch("a map")),
        },
        AttributeType::L => match raw {
            Value::Array(items) => Ok(AttributeValue::L(items.iter().map(infer).collect())),
            _ => Err(mismatch("a list")),
        },
        AttributeType::Ss => match raw {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        _ => return Err(mismatch("an array of strings")),
                    }
                }
                Ok(AttributeValue::Ss(out))
            }
            _ => Err(mismatch("an array of strings")),
        },
        AttributeType::Ns => match raw {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Number(n) => out.push(n.to_string()),
                        _ => return Err(mismatch("an array of numbers")),
                    }
                }
                Ok(AttributeValue::Ns(out))
            }
            _ => Err(mismatch("an array of numbers")),
        },
        AttributeType::Bs => match raw {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(bytes_from_json(descriptor, attr, item)?);
                }
                Ok(AttributeValue::Bs(out))
            }
            _ => Err(mismatch("an array of binary payloads")),
        },
        AttributeType::B => unreachable!("handled above"),
    }
}

/// Schemaless conversion for members of nested maps and lists.
fn infer(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(infer).collect()),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), infer(v));
            }
            AttributeValue::M(out)
        }
    }
}

fn bytes_from_json(
    descriptor: &ModelDescriptor,
    attr: &AttributeDescriptor,
    raw: &Value,
) -> TheoryResult<Bytes> {
    use base64::engine::general_purpose::STANDARD as BASE64_STD;
    use base64::Engine;

    let invalid = |reason: String| TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!("attribute {:?}: {reason}", attr.attribute),
    };
    match raw {
        Value::String(s) => BASE64_STD
            .decode(s)
            .map(Bytes::from)
            .map_err(|e| invalid(format!("invalid base64 payload: {e}"))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let byte = item
                    .as_u64()
                    .filter(|b| *b <= 255)
                    .ok_or_else(|| invalid("binary array member is not a byte".into()))?;
                out.push(byte as u8);
            }
            Ok(Bytes::from(out))
        }
        _ => Err(invalid("expects bytes or a base64 string".into())),
    }
}

/// Coerce any accepted expiry representation to integer epoch seconds.
fn epoch_seconds(
    descriptor: &ModelDescriptor,
    attr: &AttributeDescriptor,
    raw: &Value,
) -> TheoryResult<i64> {
    let invalid = || TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!(
            "attribute {:?} expects epoch seconds or an RFC 3339 timestamp",
            attr.attribute
        ),
    };
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                Ok(f.trunc() as i64)
            } else {
                Err(invalid())
            }
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
