//! Fluent descriptor construction.

use std::collections::BTreeMap;
use theorydb_core::{
    AttributeDescriptor, AttributeFormat, AttributeRole, AttributeType, IndexDescriptor,
    IndexType, KeyLayout, ModelDescriptor, Modifiers, NamingConvention, Projection, TheoryError,
    TheoryResult,
};

/// Builder for one attribute declaration.
///
/// Role helpers set the type and format the role demands, so
/// `Attribute::new("created_at", AttributeType::S).created_at()` is already
/// a valid lifecycle attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    field: String,
    name_override: Option<String>,
    attr_type: AttributeType,
    roles: Vec<AttributeRole>,
    modifiers: Modifiers,
    format: Option<AttributeFormat>,
    tags: BTreeMap<String, String>,
}

impl Attribute {
    /// Declare an attribute bound to the given serialized field name.
    pub fn new(field: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            field: field.into(),
            name_override: None,
            attr_type,
            roles: Vec::new(),
            modifiers: Modifiers::default(),
            format: None,
            tags: BTreeMap::new(),
        }
    }

    /// Override the store attribute name instead of deriving it from the
    /// naming convention.
    pub fn named(mut self, attribute: impl Into<String>) -> Self {
        self.name_override = Some(attribute.into());
        self
    }

    /// Mark as the table partition key.
    pub fn partition(mut self) -> Self {
        self.roles.push(AttributeRole::Partition);
        self
    }

    /// Mark as the table sort key.
    pub fn sort(mut self) -> Self {
        self.roles.push(AttributeRole::Sort);
        self
    }

    /// Mark as the creation timestamp (type `S`, rfc3339nano).
    pub fn created_at(mut self) -> Self {
        self.roles.push(AttributeRole::CreatedAt);
        self.format.get_or_insert(AttributeFormat::Rfc3339Nano);
        self
    }

    /// Mark as the last-update timestamp (type `S`, rfc3339nano).
    pub fn updated_at(mut self) -> Self {
        self.roles.push(AttributeRole::UpdatedAt);
        self.format.get_or_insert(AttributeFormat::Rfc3339Nano);
        self
    }

    /// Mark as the optimistic-locking version counter (type `N`).
    pub fn version(mut self) -> Self {
        self.roles.push(AttributeRole::Version);
        self
    }

    /// Mark as the item expiry (type `N`, epoch seconds).
    pub fn ttl(mut self) -> Self {
        self.roles.push(AttributeRole::Ttl);
        self.format.get_or_insert(AttributeFormat::UnixSeconds);
        self
    }

    /// Mark as the partition key of the named index.
    pub fn index_partition(mut self, index: impl Into<String>) -> Self {
        self.roles.push(AttributeRole::IndexPartition(index.into()));
        self
    }

    /// Mark as the sort key of the named index.
    pub fn index_sort(mut self, index: impl Into<String>) -> Self {
        self.roles.push(AttributeRole::IndexSort(index.into()));
        self
    }

    /// Encoding fails when the value is empty or absent.
    pub fn required(mut self) -> Self {
        self.modifiers.required = true;
        self
    }

    /// Omit empty values from write payloads.
    pub fn omit_empty(mut self) -> Self {
        self.modifiers.omit_empty = true;
        self
    }

    /// Store the value as a canonical JSON string.
    pub fn json(mut self) -> Self {
        self.modifiers.json = true;
        self
    }

    /// Store the value as raw bytes.
    pub fn binary(mut self) -> Self {
        self.modifiers.binary = true;
        self
    }

    /// Store the value as an encrypted envelope.
    pub fn encrypted(mut self) -> Self {
        self.modifiers.encrypted = true;
        self
    }

    /// Set the declared value format.
    pub fn format(mut self, format: AttributeFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Attach passthrough metadata.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    fn into_descriptor(self, naming: NamingConvention) -> AttributeDescriptor {
        let attribute = self
            .name_override
            .unwrap_or_else(|| naming.apply(&self.field));
        AttributeDescriptor {
            attribute,
            attr_type: self.attr_type,
            field: self.field,
            roles: self.roles,
            modifiers: self.modifiers,
            format: self.format,
            tags: self.tags,
        }
    }
}

/// Declared secondary index, key attributes resolved from roles at build.
#[derive(Debug, Clone)]
struct IndexDecl {
    name: String,
    index_type: IndexType,
    projection: Projection,
}

/// Fluent builder producing a validated [`ModelDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    table_name: String,
    naming: NamingConvention,
    attributes: Vec<Attribute>,
    indexes: Vec<IndexDecl>,
}

impl DescriptorBuilder {
    /// Start a descriptor for the named model and table.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            naming: NamingConvention::default(),
            attributes: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Set the naming convention for derived attribute names.
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Declare one attribute.
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declare a global secondary index; its keys come from attributes
    /// marked [`Attribute::index_partition`] / [`Attribute::index_sort`].
    pub fn global_index(mut self, name: impl Into<String>, projection: Projection) -> Self {
        self.indexes.push(IndexDecl {
            name: name.into(),
            index_type: IndexType::Gsi,
            projection,
        });
        self
    }

    /// Declare a local secondary index; its sort key comes from an
    /// attribute marked [`Attribute::index_sort`].
    pub fn local_index(mut self, name: impl Into<String>, projection: Projection) -> Self {
        self.indexes.push(IndexDecl {
            name: name.into(),
            index_type: IndexType::Lsi,
            projection,
        });
        self
    }

    /// Merge a nested declaration's attributes into this one, depth-first.
    ///
    /// The embedded builder's name, table, and indexes are discarded; its
    /// attributes join the parent namespace and are validated there, so a
    /// name collision surfaces as `InvalidModel` at build.
    pub fn embed(mut self, nested: DescriptorBuilder) -> Self {
        self.attributes.extend(nested.attributes);
        self
    }

    /// Resolve names, derive the key layout, and validate.
    pub fn build(self) -> TheoryResult<ModelDescriptor> {
        let naming = self.naming;
        let attributes: Vec<AttributeDescriptor> = self
            .attributes
            .into_iter()
            .map(|a| a.into_descriptor(naming))
            .collect();

        let invalid = |reason: String| TheoryError::InvalidModel {
            model: self.name.clone(),
            reason,
        };

        let partition = attributes
            .iter()
            .find(|a| a.has_role(&AttributeRole::Partition))
            .ok_or_else(|| invalid("no attribute carries the partition-key role".into()))?;
        let sort = attributes
            .iter()
            .find(|a| a.has_role(&AttributeRole::Sort))
            .map(|a| a.attribute.clone());
        let keys = KeyLayout {
            partition: partition.attribute.clone(),
            sort,
        };

        // Resolve each declared index's keys from attribute roles. LSIs
        // share the table partition key.
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for decl in self.indexes {
            let partition_attr = match decl.index_type {
                IndexType::Lsi => Some(keys.partition.clone()),
                IndexType::Gsi => attributes
                    .iter()
                    .find(|a| a.has_role(&AttributeRole::IndexPartition(decl.name.clone())))
                    .map(|a| a.attribute.clone()),
            };
            let partition_attr = partition_attr.ok_or_else(|| {
                invalid(format!(
                    "index {:?} has no attribute marked as its partition key",
                    decl.name
                ))
            })?;
            let sort_attr = attributes
                .iter()
                .find(|a| a.has_role(&AttributeRole::IndexSort(decl.name.clone())))
                .map(|a| a.attribute.clone());
            indexes.push(IndexDescriptor {
                name: decl.name,
                index_type: decl.index_type,
                partition: partition_attr,
                sort: sort_attr,
                projection: decl.projection,
            });
        }

        let descriptor = ModelDescriptor {
            name: self.name,
            table_name: self.table_name,
            naming,
            attributes,
            keys,
            indexes,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_builder() -> DescriptorBuilder {
        DescriptorBuilder::new("User", "users")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(Attribute::new("nick_name", AttributeType::S).omit_empty())
            .attribute(Attribute::new("version", AttributeType::N).version())
            .attribute(Attribute::new("created_at", AttributeType::S).created_at())
            .attribute(Attribute::new("updated_at", AttributeType::S).updated_at())
    }

    #[test]
    fn builds_and_derives_key_layout() {
        let d = user_builder().build().unwrap();
        assert_eq!(d.keys.partition, "PK");
        assert_eq!(d.keys.sort.as_deref(), Some("SK"));
        assert_eq!(d.attribute("nickName").unwrap().field, "nick_name");
        assert!(d.attribute("nickName").unwrap().modifiers.omit_empty);
    }

    #[test]
    fn lifecycle_roles_preset_formats() {
        let d = user_builder().build().unwrap();
        assert_eq!(
            d.attribute("createdAt").unwrap().format,
            Some(AttributeFormat::Rfc3339Nano)
        );
    }

    #[test]
    fn gsi_keys_resolve_from_roles() {
        let d = user_builder()
            .attribute(
                Attribute::new("email", AttributeType::S)
                    .index_partition("by-email")
                    .index_sort("by-status"),
            )
            .attribute(Attribute::new("status", AttributeType::S).index_partition("by-status"))
            .global_index("by-email", Projection::All)
            .global_index("by-status", Projection::KeysOnly)
            .build()
            .unwrap();
        assert_eq!(d.index("by-email").unwrap().partition, "email");
        assert_eq!(d.index("by-status").unwrap().partition, "status");
        assert_eq!(d.index("by-status").unwrap().sort.as_deref(), Some("email"));
    }

    #[test]
    fn lsi_shares_table_partition_key() {
        let d = user_builder()
            .attribute(Attribute::new("score", AttributeType::N).index_sort("by-score"))
            .local_index("by-score", Projection::All)
            .build()
            .unwrap();
        let ix = d.index("by-score").unwrap();
        assert_eq!(ix.partition, "PK");
        assert_eq!(ix.sort.as_deref(), Some("score"));
    }

    #[test]
    fn embed_merges_and_collides_loudly() {
        let address = DescriptorBuilder::new("Address", "unused")
            .attribute(Attribute::new("city", AttributeType::S))
            .attribute(Attribute::new("zip", AttributeType::S));
        let d = user_builder().embed(address).build().unwrap();
        assert!(d.attribute("city").is_some());

        let clashing = DescriptorBuilder::new("Address", "unused")
            .attribute(Attribute::new("nick_name", AttributeType::S));
        let err = user_builder().embed(clashing).build().unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn index_without_key_attribute_fails() {
        let err = user_builder()
            .global_index("by-email", Projection::All)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("by-email"));
    }
}
