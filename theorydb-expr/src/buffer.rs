//! Placeholder allocation.

use crate::path::{Path, PathSegment};
use std::collections::HashMap;
use theorydb_core::AttributeValue;

/// Allocator for `#nN` name placeholders and `:vN` value placeholders.
///
/// One buffer serves a whole operation, so a key condition, filter, and
/// projection compiled together share a namespace and the same attribute
/// never gets two placeholders.
#[derive(Debug, Default)]
pub struct ExprBuffer {
    names: Vec<String>,
    name_lookup: HashMap<String, usize>,
    values: Vec<AttributeValue>,
}

impl ExprBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for one attribute name; deduplicated per name.
    pub fn name(&mut self, ident: &str) -> String {
        let slot = match self.name_lookup.get(ident) {
            Some(slot) => *slot,
            None => {
                let slot = self.names.len();
                self.names.push(ident.to_string());
                self.name_lookup.insert(ident.to_string(), slot);
                slot
            }
        };
        format!("#n{slot}")
    }

    /// Placeholder for one value; values are never deduplicated.
    pub fn value(&mut self, value: AttributeValue) -> String {
        let slot = self.values.len();
        self.values.push(value);
        format!(":v{slot}")
    }

    /// Render a validated path with every identifier replaced by its
    /// placeholder.
    pub fn path(&mut self, path: &Path) -> String {
        let mut out = String::new();
        for (i, segment) in path.segments.iter().enumerate() {
            match segment {
                PathSegment::Attr(ident) => {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(&self.name(ident));
                }
                PathSegment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// Whether any name placeholder was allocated.
    pub fn has_names(&self) -> bool {
        !self.names.is_empty()
    }

    /// Whether any value placeholder was allocated.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Consume the buffer into the store's placeholder maps.
    pub fn into_parts(self) -> (HashMap<String, String>, HashMap<String, AttributeValue>) {
        let names = self
            .names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (format!("#n{i}"), name))
            .collect();
        let values = self
            .values
            .into_iter()
            .enumerate()
            .map(|(i, value)| (format!(":v{i}"), value))
            .collect();
        (names, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_deduplicate_values_do_not() {
        let mut buf = ExprBuffer::new();
        assert_eq!(buf.name("status"), "#n0");
        assert_eq!(buf.name("owner"), "#n1");
        assert_eq!(buf.name("status"), "#n0");
        assert_eq!(buf.value(AttributeValue::n(1)), ":v0");
        assert_eq!(buf.value(AttributeValue::n(1)), ":v1");

        let (names, values) = buf.into_parts();
        assert_eq!(names["#n0"], "status");
        assert_eq!(names["#n1"], "owner");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn paths_render_with_placeholders_only() {
        let mut buf = ExprBuffer::new();
        let path = Path::parse("items[2].name").unwrap();
        assert_eq!(buf.path(&path), "#n0[2].#n1");
    }
}
