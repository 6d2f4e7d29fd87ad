//! Write-condition compilation.

use crate::buffer::ExprBuffer;
use crate::filter::{compile_predicate, PredicateUse};
use crate::ExprTarget;
use theorydb_core::{
    AttributeRole, AttributeValue, Filter, ModelDescriptor, TheoryError, TheoryResult,
};

/// Compile a condition expression for a conditional write.
///
/// Shares the filter grammar but may reference key attributes, which is how
/// idempotent creates and version guards are expressed.
pub fn compile_condition(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    condition: &Filter,
) -> TheoryResult<String> {
    compile_predicate(buf, target, condition, PredicateUse::Condition)
}

/// The idempotent-create guard: `attribute_not_exists(#pk)`.
pub fn create_guard(buf: &mut ExprBuffer, descriptor: &ModelDescriptor) -> String {
    format!(
        "attribute_not_exists({})",
        buf.name(&descriptor.keys.partition)
    )
}

/// The optimistic-locking guard: `#version = :provided`.
pub fn version_guard(
    buf: &mut ExprBuffer,
    descriptor: &ModelDescriptor,
    provided: i64,
) -> TheoryResult<String> {
    let attr = descriptor
        .attribute_by_role(&AttributeRole::Version)
        .ok_or_else(|| TheoryError::InvalidModel {
            model: descriptor.name.clone(),
            reason: "model declares no version attribute".into(),
        })?;
    Ok(format!(
        "{} = {}",
        buf.name(&attr.attribute),
        buf.value(AttributeValue::n(provided))
    ))
}
