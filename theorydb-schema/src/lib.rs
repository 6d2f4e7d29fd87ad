//! TheoryDB Schema - Model Declaration and Registry
//!
//! Two declaration paths, one canonical result:
//! - implement [`Model`] on an annotated type and build its descriptor with
//!   [`DescriptorBuilder`], or
//! - deserialize a declarative [`ModelDescriptor`] document directly.
//!
//! Both normalize to the same frozen descriptor; nothing downstream knows
//! which path produced it. The [`SchemaRegistry`] validates descriptors in
//! one pass and publishes them copy-on-write, so lookups after registration
//! never contend with writers.

mod builder;
mod registry;

pub use builder::{Attribute, DescriptorBuilder};
pub use registry::SchemaRegistry;

use serde::de::DeserializeOwned;
use serde::Serialize;
use theorydb_core::ModelDescriptor;

/// A user type that maps to one table-backed model.
///
/// The descriptor binds serialized field names to store attributes; the
/// serde implementations carry the values. Field bindings are resolved once
/// at registration, never on the hot path.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Declare the model's schema. Called once per registry registration.
    fn descriptor() -> ModelDescriptor;
}
