//! Key-condition compilation for Query.

use crate::buffer::ExprBuffer;
use crate::ExprTarget;
use theorydb_core::{
    AttributeValue, SortKeyCond, SortKeyOperator, TheoryError, TheoryResult,
};

/// Compile a key condition: partition equality plus an optional sort-key
/// predicate against the target scope's key layout.
pub fn compile_key_condition(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    partition_value: &AttributeValue,
    sort: Option<&SortKeyCond>,
) -> TheoryResult<String> {
    let partition_attr = target.partition_attr();
    check_key_operand(target, partition_attr, partition_value, "=")?;

    let mut expr = format!(
        "{} = {}",
        buf.name(partition_attr),
        buf.value(partition_value.clone())
    );

    if let Some(cond) = sort {
        let sort_attr = target.sort_attr().ok_or_else(|| TheoryError::InvalidOperator {
            operator: sort_word(cond.operator).into(),
            path: String::new(),
            reason: "target key layout has no sort key".into(),
        })?;
        expr.push_str(" AND ");
        expr.push_str(&compile_sort_cond(buf, target, sort_attr, cond)?);
    }
    Ok(expr)
}

fn compile_sort_cond(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    sort_attr: &str,
    cond: &SortKeyCond,
) -> TheoryResult<String> {
    let arity = match cond.operator {
        SortKeyOperator::Between => 2,
        _ => 1,
    };
    if cond.values.len() != arity {
        return Err(TheoryError::InvalidOperator {
            operator: sort_word(cond.operator).into(),
            path: sort_attr.to_string(),
            reason: format!("expects {arity} operand(s), got {}", cond.values.len()),
        });
    }
    for value in &cond.values {
        check_key_operand(target, sort_attr, value, sort_word(cond.operator))?;
    }

    let name = buf.name(sort_attr);
    Ok(match cond.operator {
        SortKeyOperator::Eq => format!("{name} = {}", buf.value(cond.values[0].clone())),
        SortKeyOperator::Lt => format!("{name} < {}", buf.value(cond.values[0].clone())),
        SortKeyOperator::Le => format!("{name} <= {}", buf.value(cond.values[0].clone())),
        SortKeyOperator::Gt => format!("{name} > {}", buf.value(cond.values[0].clone())),
        SortKeyOperator::Ge => format!("{name} >= {}", buf.value(cond.values[0].clone())),
        SortKeyOperator::Between => {
            let low = buf.value(cond.values[0].clone());
            let high = buf.value(cond.values[1].clone());
            format!("{name} BETWEEN {low} AND {high}")
        }
        SortKeyOperator::BeginsWith => {
            format!("begins_with({name}, {})", buf.value(cond.values[0].clone()))
        }
    })
}

fn check_key_operand(
    target: &ExprTarget<'_>,
    attribute: &str,
    value: &AttributeValue,
    operator: &str,
) -> TheoryResult<()> {
    // Key layouts only reference declared attributes (validated at
    // registration), but stay total anyway.
    let declared = match target.descriptor.attribute(attribute) {
        Some(attr) => attr.attr_type,
        None => {
            return Err(TheoryError::InvalidOperator {
                operator: operator.to_string(),
                path: attribute.to_string(),
                reason: "key attribute is not declared".into(),
            })
        }
    };
    // begins_with takes a string prefix even on binary sort keys.
    let ok = if operator == "begins_with" {
        value.as_s().is_some()
    } else {
        value.type_code() == declared.code()
    };
    if !ok {
        return Err(TheoryError::InvalidOperator {
            operator: operator.to_string(),
            path: attribute.to_string(),
            reason: format!(
                "operand of type {} does not match key type {}",
                value.type_code(),
                declared.code()
            ),
        });
    }
    Ok(())
}

fn sort_word(op: SortKeyOperator) -> &'static str {
    match op {
        SortKeyOperator::Eq => "=",
        SortKeyOperator::Lt => "<",
        SortKeyOperator::Le => "<=",
        SortKeyOperator::Gt => ">",
        SortKeyOperator::Ge => ">=",
        SortKeyOperator::Between => "BETWEEN",
        SortKeyOperator::BeginsWith => "begins_with",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use theorydb_core::{AttributeType, ErrorKind};
    use theorydb_schema::{Attribute, DescriptorBuilder};

    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Notification", "notifications")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .build()
            .unwrap()
    }

    #[test]
    fn begins_with_on_sort_key() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let expr = compile_key_condition(
            &mut buf,
            &target,
            &AttributeValue::s("USER#admin"),
            Some(&SortKeyCond::begins_with("NOTIF#")),
        )
        .unwrap();
        assert_eq!(expr, "#n0 = :v0 AND begins_with(#n1, :v1)");
        let (names, values) = buf.into_parts();
        assert_eq!(names["#n0"], "PK");
        assert_eq!(names["#n1"], "SK");
        assert_eq!(values[":v1"], AttributeValue::s("NOTIF#"));
    }

    #[test]
    fn between_renders_two_operands() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let expr = compile_key_condition(
            &mut buf,
            &target,
            &AttributeValue::s("U#1"),
            Some(&SortKeyCond::between(
                AttributeValue::s("a"),
                AttributeValue::s("m"),
            )),
        )
        .unwrap();
        assert_eq!(expr, "#n0 = :v0 AND #n1 BETWEEN :v1 AND :v2");
    }

    #[test]
    fn sort_predicate_without_sort_key_fails() {
        let descriptor = DescriptorBuilder::new("Flat", "flat")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .build()
            .unwrap();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err = compile_key_condition(
            &mut buf,
            &target,
            &AttributeValue::s("U#1"),
            Some(&SortKeyCond::eq(AttributeValue::s("x"))),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);
    }

    #[test]
    fn partition_operand_type_is_checked() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err =
            compile_key_condition(&mut buf, &target, &AttributeValue::n(5), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);
    }
}
