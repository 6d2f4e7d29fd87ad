//! Model descriptors.
//!
//! A [`ModelDescriptor`] is the canonical, frozen schema of one registered
//! model: its attributes, their store types, roles, and modifiers, the
//! primary-key layout, and any secondary indexes. Descriptors are produced
//! once at registration (from an annotated type or a declarative document),
//! validated in one pass, and never mutated afterwards.

use crate::error::{TheoryError, TheoryResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Store type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    S,
    N,
    B,
    Bool,
    Null,
    M,
    L,
    Ss,
    Ns,
    Bs,
}

impl AttributeType {
    /// The wire type code.
    pub fn code(&self) -> &'static str {
        match self {
            AttributeType::S => "S",
            AttributeType::N => "N",
            AttributeType::B => "B",
            AttributeType::Bool => "BOOL",
            AttributeType::Null => "NULL",
            AttributeType::M => "M",
            AttributeType::L => "L",
            AttributeType::Ss => "SS",
            AttributeType::Ns => "NS",
            AttributeType::Bs => "BS",
        }
    }

    /// Whether this type may key a table or index.
    pub fn is_key_eligible(&self) -> bool {
        matches!(self, AttributeType::S | AttributeType::N | AttributeType::B)
    }

    /// Whether this is one of the set types.
    pub fn is_set(&self) -> bool {
        matches!(self, AttributeType::Ss | AttributeType::Ns | AttributeType::Bs)
    }
}

/// Naming convention applied to field names when deriving attribute names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `nick_name` becomes `nickName` (default)
    #[default]
    CamelCase,
    /// Field names pass through unchanged
    SnakeCase,
}

impl NamingConvention {
    /// Derive the store attribute name from a (snake_case) field name.
    pub fn apply(&self, field: &str) -> String {
        match self {
            NamingConvention::SnakeCase => field.to_string(),
            NamingConvention::CamelCase => {
                let mut out = String::with_capacity(field.len());
                let mut upper_next = false;
                for ch in field.chars() {
                    if ch == '_' {
                        upper_next = true;
                    } else if upper_next {
                        out.extend(ch.to_uppercase());
                        upper_next = false;
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }
}

/// Role an attribute plays in the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRole {
    /// Table partition key
    Partition,
    /// Table sort key
    Sort,
    /// Creation timestamp, stamped on create/put
    CreatedAt,
    /// Last-update timestamp, stamped on every write
    UpdatedAt,
    /// Optimistic-locking counter
    Version,
    /// Item expiry, epoch seconds
    Ttl,
    /// Partition key of the named secondary index
    IndexPartition(String),
    /// Sort key of the named secondary index
    IndexSort(String),
}

impl AttributeRole {
    /// Whether this role makes the attribute part of some key layout.
    pub fn is_key(&self) -> bool {
        matches!(
            self,
            AttributeRole::Partition
                | AttributeRole::Sort
                | AttributeRole::IndexPartition(_)
                | AttributeRole::IndexSort(_)
        )
    }
}

/// Behavior modifiers on an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Encoding fails when the value is empty or absent
    #[serde(default)]
    pub required: bool,
    /// Empty values are omitted from write payloads
    #[serde(default)]
    pub omit_empty: bool,
    /// Value is stored as a canonical JSON string (type `S`)
    #[serde(default)]
    pub json: bool,
    /// Value is stored as raw bytes (type `B`)
    #[serde(default)]
    pub binary: bool,
    /// Value is stored as an encrypted envelope (type `M`)
    #[serde(default)]
    pub encrypted: bool,
}

/// Declared value format for timestamp-like attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeFormat {
    /// RFC 3339 with nanosecond precision, stored as `S`
    Rfc3339Nano,
    /// Integer epoch seconds, stored as `N`
    UnixSeconds,
    /// Plain integer, stored as `N`
    Int,
}

/// One attribute of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Canonical store attribute name
    pub attribute: String,
    /// Store type
    pub attr_type: AttributeType,
    /// Serialized field name this attribute binds to
    pub field: String,
    /// Roles this attribute plays
    #[serde(default)]
    pub roles: Vec<AttributeRole>,
    /// Behavior modifiers
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Declared value format
    #[serde(default)]
    pub format: Option<AttributeFormat>,
    /// Passthrough metadata (nested shape hints, source annotations)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl AttributeDescriptor {
    /// Whether the attribute carries the given role.
    pub fn has_role(&self, role: &AttributeRole) -> bool {
        self.roles.contains(role)
    }

    /// Whether the attribute keys the table or any index.
    pub fn is_key(&self) -> bool {
        self.roles.iter().any(AttributeRole::is_key)
    }
}

/// Kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexType {
    Gsi,
    Lsi,
}

/// Attribute projection of a secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// One secondary index of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub index_type: IndexType,
    /// Partition-key attribute name
    pub partition: String,
    /// Sort-key attribute name
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub projection: Projection,
}

/// Primary-key layout of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLayout {
    /// Partition-key attribute name
    pub partition: String,
    /// Sort-key attribute name
    #[serde(default)]
    pub sort: Option<String>,
}

/// The frozen schema of one registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier, unique within a registry
    pub name: String,
    /// Store table name
    pub table_name: String,
    #[serde(default)]
    pub naming: NamingConvention,
    /// Ordered attribute list
    pub attributes: Vec<AttributeDescriptor>,
    /// Primary-key layout, derived from roles at registration
    pub keys: KeyLayout,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl ModelDescriptor {
    /// Look up an attribute by its store name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.attribute == name)
    }

    /// Look up the single attribute carrying the given role.
    pub fn attribute_by_role(&self, role: &AttributeRole) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.has_role(role))
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Whether any attribute is marked `encrypted`.
    pub fn has_encrypted(&self) -> bool {
        self.attributes.iter().any(|a| a.modifiers.encrypted)
    }

    /// Whether the named attribute is marked `encrypted`.
    pub fn is_encrypted_attribute(&self, name: &str) -> bool {
        self.attribute(name)
            .map(|a| a.modifiers.encrypted)
            .unwrap_or(false)
    }

    /// Validate every registration invariant in one pass.
    ///
    /// Called by the registry before a descriptor is published; a descriptor
    /// that fails here never becomes visible to lookups.
    pub fn validate(&self) -> TheoryResult<()> {
        let invalid = |reason: String| TheoryError::InvalidModel {
            model: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("model name is empty".into()));
        }
        if self.table_name.is_empty() {
            return Err(invalid("table name is empty".into()));
        }

        // Attribute names: non-empty and unique.
        let mut seen = BTreeSet::new();
        for attr in &self.attributes {
            if attr.attribute.is_empty() {
                return Err(invalid(format!("attribute bound to field {:?} has an empty name", attr.field)));
            }
            if !seen.insert(attr.attribute.as_str()) {
                return Err(invalid(format!("duplicate attribute name {:?}", attr.attribute)));
            }
        }

        // Singleton roles are held by at most one attribute each.
        let singleton_roles = [
            AttributeRole::Partition,
            AttributeRole::Sort,
            AttributeRole::CreatedAt,
            AttributeRole::UpdatedAt,
            AttributeRole::Version,
            AttributeRole::Ttl,
        ];
        for role in &singleton_roles {
            let holders: Vec<&str> = self
                .attributes
                .iter()
                .filter(|a| a.has_role(role))
                .map(|a| a.attribute.as_str())
                .collect();
            if holders.len() > 1 {
                return Err(invalid(format!(
                    "role {role:?} is held by more than one attribute: {holders:?}"
                )));
            }
        }

        // Exactly one partition key.
        let partition = match self.attribute_by_role(&AttributeRole::Partition) {
            Some(attr) => attr,
            None => return Err(invalid("no attribute carries the partition-key role".into())),
        };
        let sort = self.attribute_by_role(&AttributeRole::Sort);

        // The derived key layout must agree with the roles.
        if self.keys.partition != partition.attribute {
            return Err(invalid(format!(
                "key layout names partition {:?} but role is on {:?}",
                self.keys.partition, partition.attribute
            )));
        }
        if self.keys.sort.as_deref() != sort.map(|a| a.attribute.as_str()) {
            return Err(invalid("key layout disagrees with sort-key role".into()));
        }

        for attr in &self.attributes {
            let m = &attr.modifiers;

            // Encrypted attributes may not participate in any key layout.
            if m.encrypted && attr.is_key() {
                return Err(invalid(format!(
                    "encrypted attribute {:?} carries a key role",
                    attr.attribute
                )));
            }

            if m.json && m.binary {
                return Err(invalid(format!(
                    "attribute {:?} is both json and binary",
                    attr.attribute
                )));
            }
            if m.json && attr.attr_type != AttributeType::S {
                return Err(invalid(format!(
                    "json attribute {:?} must be of type S, not {}",
                    attr.attribute,
                    attr.attr_type.code()
                )));
            }
            if m.binary && attr.attr_type != AttributeType::B {
                return Err(invalid(format!(
                    "binary attribute {:?} must be of type B, not {}",
                    attr.attribute,
                    attr.attr_type.code()
                )));
            }

            if attr.has_role(&AttributeRole::Version) && attr.attr_type != AttributeType::N {
                return Err(invalid(format!(
                    "version attribute {:?} must be of type N",
                    attr.attribute
                )));
            }
            if attr.has_role(&AttributeRole::Ttl)
                && (attr.attr_type != AttributeType::N
                    || attr.format != Some(AttributeFormat::UnixSeconds))
            {
                return Err(invalid(format!(
                    "ttl attribute {:?} must be of type N with format unix_seconds",
                    attr.attribute
                )));
            }
            for role in [AttributeRole::CreatedAt, AttributeRole::UpdatedAt] {
                if attr.has_role(&role)
                    && (attr.attr_type != AttributeType::S
                        || attr.format != Some(AttributeFormat::Rfc3339Nano))
                {
                    return Err(invalid(format!(
                        "{role:?} attribute {:?} must be of type S with format rfc3339nano",
                        attr.attribute
                    )));
                }
            }

            if attr.is_key() && !attr.attr_type.is_key_eligible() {
                return Err(invalid(format!(
                    "key attribute {:?} has non-key type {}",
                    attr.attribute,
                    attr.attr_type.code()
                )));
            }
        }

        // Index layouts reference declared attributes and agree with roles.
        let mut index_names = BTreeSet::new();
        for index in &self.indexes {
            if index.name.is_empty() {
                return Err(invalid("index with an empty name".into()));
            }
            if !index_names.insert(index.name.as_str()) {
                return Err(invalid(format!("duplicate index name {:?}", index.name)));
            }
            if self.attribute(&index.partition).is_none() {
                return Err(invalid(format!(
                    "index {:?} partition key {:?} is not a declared attribute",
                    index.name, index.partition
                )));
            }
            if let Some(sort) = &index.sort {
                if self.attribute(sort).is_none() {
                    return Err(invalid(format!(
                        "index {:?} sort key {:?} is not a declared attribute",
                        index.name, sort
                    )));
                }
            }
        }
        for attr in &self.attributes {
            for role in &attr.roles {
                match role {
                    AttributeRole::IndexPartition(name) => {
                        match self.index(name) {
                            Some(ix) if ix.partition == attr.attribute => {}
                            Some(ix) => {
                                return Err(invalid(format!(
                                    "attribute {:?} claims partition of index {:?}, which names {:?}",
                                    attr.attribute, name, ix.partition
                                )))
                            }
                            None => {
                                return Err(invalid(format!(
                                    "attribute {:?} references undeclared index {:?}",
                                    attr.attribute, name
                                )))
                            }
                        }
                    }
                    AttributeRole::IndexSort(name) => match self.index(name) {
                        Some(ix) if ix.sort.as_deref() == Some(attr.attribute.as_str()) => {}
                        Some(ix) => {
                            return Err(invalid(format!(
                                "attribute {:?} claims sort of index {:?}, which names {:?}",
                                attr.attribute, name, ix.sort
                            )))
                        }
                        None => {
                            return Err(invalid(format!(
                                "attribute {:?} references undeclared index {:?}",
                                attr.attribute, name
                            )))
                        }
                    },
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, ty: AttributeType, roles: Vec<AttributeRole>) -> AttributeDescriptor {
        AttributeDescriptor {
            attribute: name.to_string(),
            attr_type: ty,
            field: name.to_string(),
            roles,
            modifiers: Modifiers::default(),
            format: None,
            tags: BTreeMap::new(),
        }
    }

    fn minimal() -> ModelDescriptor {
        ModelDescriptor {
            name: "User".into(),
            table_name: "users".into(),
            naming: NamingConvention::CamelCase,
            attributes: vec![
                attr("PK", AttributeType::S, vec![AttributeRole::Partition]),
                attr("SK", AttributeType::S, vec![AttributeRole::Sort]),
            ],
            keys: KeyLayout {
                partition: "PK".into(),
                sort: Some("SK".into()),
            },
            indexes: vec![],
        }
    }

    #[test]
    fn minimal_descriptor_validates() {
        minimal().validate().unwrap();
    }

    #[test]
    fn missing_partition_role_fails() {
        let mut d = minimal();
        d.attributes[0].roles.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn encrypted_key_attribute_fails() {
        let mut d = minimal();
        d.attributes[0].modifiers.encrypted = true;
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("encrypted"));
    }

    #[test]
    fn ttl_must_be_numeric_epoch_seconds() {
        let mut d = minimal();
        d.attributes.push(attr("expires", AttributeType::S, vec![AttributeRole::Ttl]));
        assert!(d.validate().is_err());

        let last = d.attributes.last_mut().unwrap();
        last.attr_type = AttributeType::N;
        last.format = Some(AttributeFormat::UnixSeconds);
        d.validate().unwrap();
    }

    #[test]
    fn json_and_binary_are_exclusive() {
        let mut d = minimal();
        let mut a = attr("blob", AttributeType::S, vec![]);
        a.modifiers.json = true;
        a.modifiers.binary = true;
        d.attributes.push(a);
        assert!(d.validate().is_err());
    }

    #[test]
    fn index_keys_must_be_declared() {
        let mut d = minimal();
        d.indexes.push(IndexDescriptor {
            name: "by-email".into(),
            index_type: IndexType::Gsi,
            partition: "email".into(),
            sort: None,
            projection: Projection::All,
        });
        assert!(d.validate().is_err());

        d.attributes.push(attr(
            "email",
            AttributeType::S,
            vec![AttributeRole::IndexPartition("by-email".into())],
        ));
        d.validate().unwrap();
    }

    #[test]
    fn camel_case_naming() {
        let n = NamingConvention::CamelCase;
        assert_eq!(n.apply("nick_name"), "nickName");
        assert_eq!(n.apply("pk"), "pk");
        assert_eq!(n.apply("created_at_ns"), "createdAtNs");
        assert_eq!(NamingConvention::SnakeCase.apply("nick_name"), "nick_name");
    }
}
