//! Filter and condition predicate compilation.

use crate::buffer::ExprBuffer;
use crate::path::{Path, PathSegment};
use crate::ExprTarget;
use theorydb_core::{
    AttributeDescriptor, AttributeType, AttributeValue, Filter, FilterCond, FilterOperator,
    TheoryError, TheoryResult,
};

/// Where a predicate will run. Query filters refuse the scope's key
/// attributes (those belong in key conditions); scan filters and write
/// conditions may name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PredicateUse {
    Filter,
    ScanFilter,
    Condition,
}

impl PredicateUse {
    fn context(&self) -> &'static str {
        match self {
            PredicateUse::Filter | PredicateUse::ScanFilter => "filter expression",
            PredicateUse::Condition => "condition expression",
        }
    }
}

/// Compile a filter tree for Query.
pub fn compile_filter(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    filter: &Filter,
) -> TheoryResult<String> {
    compile_predicate(buf, target, filter, PredicateUse::Filter)
}

/// Compile a filter tree for Scan, where key attributes are fair game.
pub fn compile_scan_filter(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    filter: &Filter,
) -> TheoryResult<String> {
    compile_predicate(buf, target, filter, PredicateUse::ScanFilter)
}

pub(crate) fn compile_predicate(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    filter: &Filter,
    usage: PredicateUse,
) -> TheoryResult<String> {
    render_group(buf, target, filter, usage, true)
}

fn render_group(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    filter: &Filter,
    usage: PredicateUse,
    top: bool,
) -> TheoryResult<String> {
    match filter {
        Filter::Cond(cond) => render_leaf(buf, target, cond, usage),
        Filter::And(members) | Filter::Or(members) => {
            if members.is_empty() {
                return Err(TheoryError::InvalidOperator {
                    operator: group_word(filter).into(),
                    path: String::new(),
                    reason: "group has no members".into(),
                });
            }
            if members.len() == 1 {
                return render_group(buf, target, &members[0], usage, top);
            }
            let joiner = format!(" {} ", group_word(filter));
            let mut parts = Vec::with_capacity(members.len());
            for member in members {
                parts.push(render_group(buf, target, member, usage, false)?);
            }
            let joined = parts.join(&joiner);
            Ok(if top { joined } else { format!("({joined})") })
        }
    }
}

fn group_word(filter: &Filter) -> &'static str {
    match filter {
        Filter::And(_) => "AND",
        Filter::Or(_) => "OR",
        Filter::Cond(_) => unreachable!("leaves have no group word"),
    }
}

fn render_leaf(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    cond: &FilterCond,
    usage: PredicateUse,
) -> TheoryResult<String> {
    let path = Path::parse(&cond.path)?;
    let attr = check_path(target, &path, usage.context(), false)?;

    if usage == PredicateUse::Filter && target.is_scope_key(path.root()) {
        return Err(TheoryError::InvalidOperator {
            operator: operator_word(cond.operator).into(),
            path: cond.path.clone(),
            reason: "key attributes belong in key conditions, not filters".into(),
        });
    }

    check_operands(&path, attr, cond)?;

    let rendered = buf.path(&path);
    Ok(match cond.operator {
        FilterOperator::Eq => format!("{rendered} = {}", buf.value(cond.values[0].clone())),
        FilterOperator::Ne => format!("{rendered} <> {}", buf.value(cond.values[0].clone())),
        FilterOperator::Lt => format!("{rendered} < {}", buf.value(cond.values[0].clone())),
        FilterOperator::Le => format!("{rendered} <= {}", buf.value(cond.values[0].clone())),
        FilterOperator::Gt => format!("{rendered} > {}", buf.value(cond.values[0].clone())),
        FilterOperator::Ge => format!("{rendered} >= {}", buf.value(cond.values[0].clone())),
        FilterOperator::Between => {
            let low = buf.value(cond.values[0].clone());
            let high = buf.value(cond.values[1].clone());
            format!("{rendered} BETWEEN {low} AND {high}")
        }
        FilterOperator::BeginsWith => {
            format!("begins_with({rendered}, {})", buf.value(cond.values[0].clone()))
        }
        FilterOperator::Contains => {
            format!("contains({rendered}, {})", buf.value(cond.values[0].clone()))
        }
        FilterOperator::In => {
            let slots: Vec<String> = cond
                .values
                .iter()
                .map(|v| buf.value(v.clone()))
                .collect();
            format!("{rendered} IN ({})", slots.join(", "))
        }
        FilterOperator::Exists => format!("attribute_exists({rendered})"),
        FilterOperator::NotExists => format!("attribute_not_exists({rendered})"),
    })
}

/// Validate a path against the descriptor: the root must be declared and
/// the first traversal step must fit the root's type. Encrypted roots are
/// rejected unless the caller writes envelopes itself (plain update SET).
/// Returns the root's descriptor entry for operand checks.
pub(crate) fn check_path<'a>(
    target: &ExprTarget<'a>,
    path: &Path,
    context: &str,
    allow_encrypted: bool,
) -> TheoryResult<&'a AttributeDescriptor> {
    let attr = target
        .descriptor
        .attribute(path.root())
        .ok_or_else(|| TheoryError::InvalidOperator {
            operator: "path".into(),
            path: path.root().to_string(),
            reason: format!("attribute is not declared on model {}", target.descriptor.name),
        })?;

    if attr.modifiers.encrypted && !allow_encrypted {
        return Err(TheoryError::EncryptedFieldNotQueryable {
            attribute: attr.attribute.clone(),
            context: context.to_string(),
        });
    }

    if let Some(step) = path.first_step() {
        let fits = match step {
            PathSegment::Attr(_) => attr.attr_type == AttributeType::M,
            PathSegment::Index(_) => attr.attr_type == AttributeType::L,
        };
        if !fits {
            return Err(TheoryError::InvalidOperator {
                operator: "path".into(),
                path: path.root().to_string(),
                reason: format!(
                    "attribute of type {} does not support this traversal",
                    attr.attr_type.code()
                ),
            });
        }
    }
    Ok(attr)
}

fn operator_word(op: FilterOperator) -> &'static str {
    match op {
        FilterOperator::Eq => "=",
        FilterOperator::Ne => "<>",
        FilterOperator::Lt => "<",
        FilterOperator::Le => "<=",
        FilterOperator::Gt => ">",
        FilterOperator::Ge => ">=",
        FilterOperator::Between => "BETWEEN",
        FilterOperator::BeginsWith => "begins_with",
        FilterOperator::Contains => "contains",
        FilterOperator::In => "IN",
        FilterOperator::Exists => "attribute_exists",
        FilterOperator::NotExists => "attribute_not_exists",
    }
}

fn check_operands(
    path: &Path,
    attr: &AttributeDescriptor,
    cond: &FilterCond,
) -> TheoryResult<()> {
    let fail = |reason: String| TheoryError::InvalidOperator {
        operator: operator_word(cond.operator).into(),
        path: cond.path.clone(),
        reason,
    };

    if let Some(arity) = cond.operator.arity() {
        if cond.values.len() != arity {
            return Err(fail(format!(
                "expects {arity} operand(s), got {}",
                cond.values.len()
            )));
        }
    } else if cond.values.is_empty() {
        return Err(fail("expects at least one operand".into()));
    }

    // Type checks apply to bare attributes; nested members have no declared
    // type to check against.
    if !path.is_root_only() {
        return Ok(());
    }
    let declared = attr.attr_type;

    let scalar_match = |value: &AttributeValue| value.type_code() == declared.code();
    match cond.operator {
        FilterOperator::Eq | FilterOperator::Ne => {
            if !scalar_match(&cond.values[0]) {
                return Err(fail(type_mismatch(declared, &cond.values[0])));
            }
        }
        FilterOperator::Lt
        | FilterOperator::Le
        | FilterOperator::Gt
        | FilterOperator::Ge
        | FilterOperator::Between => {
            if !declared.is_key_eligible() {
                return Err(fail(format!(
                    "ordering comparisons do not apply to type {}",
                    declared.code()
                )));
            }
            for value in &cond.values {
                if !scalar_match(value) {
                    return Err(fail(type_mismatch(declared, value)));
                }
            }
        }
        FilterOperator::BeginsWith => {
            if !matches!(declared, AttributeType::S | AttributeType::B) {
                return Err(fail(format!(
                    "begins_with does not apply to type {}",
                    declared.code()
                )));
            }
            if cond.values[0].as_s().is_none() {
                return Err(fail("begins_with expects a string prefix".into()));
            }
        }
        FilterOperator::Contains => {
            let member_ok = match declared {
                AttributeType::S | AttributeType::Ss => cond.values[0].as_s().is_some(),
                AttributeType::Ns => cond.values[0].as_n().is_some(),
                AttributeType::Bs => cond.values[0].as_b().is_some(),
                AttributeType::L => true,
                _ => {
                    return Err(fail(format!(
                        "contains does not apply to type {}",
                        declared.code()
                    )))
                }
            };
            if !member_ok {
                return Err(fail(type_mismatch(declared, &cond.values[0])));
            }
        }
        FilterOperator::In => {
            for value in &cond.values {
                if !scalar_match(value) {
                    return Err(fail(type_mismatch(declared, value)));
                }
            }
        }
        FilterOperator::Exists | FilterOperator::NotExists => {}
    }
    Ok(())
}

fn type_mismatch(declared: AttributeType, value: &AttributeValue) -> String {
    format!(
        "operand of type {} does not match declared type {}",
        value.type_code(),
        declared.code()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use theorydb_core::ErrorKind;
    use theorydb_schema::{Attribute, DescriptorBuilder};

    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Order", "orders")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(Attribute::new("status", AttributeType::S))
            .attribute(Attribute::new("total", AttributeType::N))
            .attribute(Attribute::new("tags", AttributeType::Ss))
            .attribute(Attribute::new("lines", AttributeType::L))
            .attribute(Attribute::new("meta", AttributeType::M))
            .attribute(Attribute::new("secret", AttributeType::S).encrypted())
            .build()
            .unwrap()
    }

    #[test]
    fn renders_groups_with_placeholders() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let filter = Filter::eq("status", AttributeValue::s("open"))
            .and(Filter::or(
                Filter::gt("total", AttributeValue::n(100)),
                Filter::contains("tags", AttributeValue::s("vip")),
            ));
        let expr = compile_filter(&mut buf, &target, &filter).unwrap();
        assert_eq!(
            expr,
            "#n0 = :v0 AND (#n1 > :v1 OR contains(#n2, :v2))"
        );
        let (names, values) = buf.into_parts();
        assert_eq!(names["#n0"], "status");
        assert_eq!(names["#n1"], "total");
        assert_eq!(names["#n2"], "tags");
        assert_eq!(values[":v0"], AttributeValue::s("open"));
    }

    #[test]
    fn raw_user_input_never_reaches_the_expression() {
        let descriptor = DescriptorBuilder::new("Weird", "weird")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("size", AttributeType::S))
            .build()
            .unwrap();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        // `size` is a store reserved word; the hostile value must only land
        // in the value map.
        let filter = Filter::eq("size", AttributeValue::s("x OR 1=1"));
        let expr = compile_filter(&mut buf, &target, &filter).unwrap();
        assert_eq!(expr, "#n0 = :v0");
        assert!(!expr.contains("size"));
        assert!(!expr.contains("OR 1=1"));
    }

    #[test]
    fn scope_keys_are_rejected_in_filters() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::eq("PK", AttributeValue::s("x")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);
        assert!(err.to_string().contains("key conditions"));
    }

    #[test]
    fn encrypted_attributes_are_rejected() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::eq("secret", AttributeValue::s("x")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncryptedFieldNotQueryable);
    }

    #[test]
    fn operand_type_mismatches_are_rejected() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);

        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::gt("status", AttributeValue::n(1)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);

        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::between("lines", AttributeValue::n(1), AttributeValue::n(2)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ordering"));
    }

    #[test]
    fn traversal_must_match_declared_structure() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);

        let mut buf = ExprBuffer::new();
        assert!(compile_filter(
            &mut buf,
            &target,
            &Filter::eq("meta.color", AttributeValue::s("red")),
        )
        .is_ok());

        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::eq("status.color", AttributeValue::s("red")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("traversal"));

        let mut buf = ExprBuffer::new();
        assert!(compile_filter(
            &mut buf,
            &target,
            &Filter::exists("lines[0]"),
        )
        .is_ok());
    }

    #[test]
    fn undeclared_attributes_are_rejected() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err = compile_filter(
            &mut buf,
            &target,
            &Filter::eq("ghost", AttributeValue::s("x")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not declared"));
    }
}
