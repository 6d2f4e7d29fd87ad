//! Canonical JSON rendering.
//!
//! UTF-8, no insignificant whitespace, object keys sorted lexicographically
//! at every depth. Both the `json` attribute modifier and the cursor token
//! format are defined over these exact bytes.

use serde_json::Value;

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's escaping is already minimal and stable.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sort_at_every_depth() {
        let value = json!({"b": {"z": 1, "a": [{"y": 2, "x": 3}]}, "a": null});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":null,"b":{"a":[{"x":3,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn no_insignificant_whitespace() {
        let value = json!({"k": [1, 2.5, "s"], "t": true});
        assert_eq!(canonical_json(&value), r#"{"k":[1,2.5,"s"],"t":true}"#);
    }

    #[test]
    fn escapes_via_serde() {
        let value = json!({"quote\"": "line\nbreak"});
        assert_eq!(canonical_json(&value), r#"{"quote\"":"line\nbreak"}"#);
    }
}
