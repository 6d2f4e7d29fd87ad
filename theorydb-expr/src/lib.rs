//! TheoryDB Expression Compiler
//!
//! Turns the predicate AST, update builders, and projection lists into the
//! store's wire expression syntax. Every attribute name is referenced
//! through a generated `#nN` placeholder and every value through a `:vN`
//! placeholder, so reserved words and user input never splice into an
//! expression string. Paths are validated before rendering; operators are
//! checked against declared operand types; encrypted attributes are
//! rejected everywhere an expression could observe them.

mod buffer;
mod condition;
mod filter;
mod index_select;
mod key_condition;
mod path;
mod projection;
mod update;

pub use buffer::ExprBuffer;
pub use condition::{compile_condition, create_guard, version_guard};
pub use filter::{compile_filter, compile_scan_filter};
pub use index_select::{select_index, IndexSelection};
pub use key_condition::compile_key_condition;
pub use path::{Path, PathSegment};
pub use projection::compile_projection;
pub use update::{compile_update, ListOperand, SetValue, Update};

use theorydb_core::{IndexDescriptor, ModelDescriptor};

/// The key scope an expression compiles against: the base table or one
/// named secondary index. Filters may not mention the scope's own key
/// attributes; key conditions may mention nothing else.
#[derive(Debug, Clone, Copy)]
pub struct ExprTarget<'a> {
    pub descriptor: &'a ModelDescriptor,
    pub index: Option<&'a IndexDescriptor>,
}

impl<'a> ExprTarget<'a> {
    /// Target the base table.
    pub fn table(descriptor: &'a ModelDescriptor) -> Self {
        Self {
            descriptor,
            index: None,
        }
    }

    /// Target a secondary index.
    pub fn index(descriptor: &'a ModelDescriptor, index: &'a IndexDescriptor) -> Self {
        Self {
            descriptor,
            index: Some(index),
        }
    }

    /// Partition-key attribute of the scope.
    pub fn partition_attr(&self) -> &'a str {
        match self.index {
            Some(index) => &index.partition,
            None => &self.descriptor.keys.partition,
        }
    }

    /// Sort-key attribute of the scope, if any.
    pub fn sort_attr(&self) -> Option<&'a str> {
        match self.index {
            Some(index) => index.sort.as_deref(),
            None => self.descriptor.keys.sort.as_deref(),
        }
    }

    /// Whether the attribute keys this scope.
    pub fn is_scope_key(&self, attribute: &str) -> bool {
        self.partition_attr() == attribute || self.sort_attr() == Some(attribute)
    }
}
