//! Predicate AST for filters, write conditions, and sort-key conditions.
//!
//! This is the user-facing expression form. The expression compiler turns
//! it into the store's wire syntax with generated placeholders; no raw
//! attribute name or value from this AST ever reaches an expression string
//! directly.

use crate::value::AttributeValue;
use serde::{Deserialize, Serialize};

/// Operator in a filter or condition expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Within an inclusive range (two operands)
    Between,
    /// String or binary prefix match
    BeginsWith,
    /// Substring, set-member, or list-member containment
    Contains,
    /// Member of an operand list
    In,
    /// Attribute is present
    Exists,
    /// Attribute is absent
    NotExists,
}

impl FilterOperator {
    /// Number of value operands the operator takes; `None` means variadic.
    pub fn arity(&self) -> Option<usize> {
        match self {
            FilterOperator::Exists | FilterOperator::NotExists => Some(0),
            FilterOperator::Between => Some(2),
            FilterOperator::In => None,
            _ => Some(1),
        }
    }
}

/// Operator accepted on a sort key within a key condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKeyOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    BeginsWith,
}

/// A sort-key predicate within a key condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKeyCond {
    pub operator: SortKeyOperator,
    pub values: Vec<AttributeValue>,
}

impl SortKeyCond {
    pub fn eq(value: AttributeValue) -> Self {
        Self {
            operator: SortKeyOperator::Eq,
            values: vec![value],
        }
    }

    pub fn begins_with(prefix: impl Into<String>) -> Self {
        Self {
            operator: SortKeyOperator::BeginsWith,
            values: vec![AttributeValue::s(prefix)],
        }
    }

    pub fn between(low: AttributeValue, high: AttributeValue) -> Self {
        Self {
            operator: SortKeyOperator::Between,
            values: vec![low, high],
        }
    }

    pub fn cmp(operator: SortKeyOperator, value: AttributeValue) -> Self {
        Self {
            operator,
            values: vec![value],
        }
    }
}

/// One leaf comparison in a filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCond {
    /// Attribute path (`a`, `a.b`, `a.b[2]`)
    pub path: String,
    pub operator: FilterOperator,
    pub values: Vec<AttributeValue>,
}

/// Filter expression tree: leaf comparisons grouped by AND/OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Cond(FilterCond),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    fn cond(path: impl Into<String>, operator: FilterOperator, values: Vec<AttributeValue>) -> Self {
        Filter::Cond(FilterCond {
            path: path.into(),
            operator,
            values,
        })
    }

    /// `path = value`
    pub fn eq(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Eq, vec![value])
    }

    /// `path <> value`
    pub fn ne(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Ne, vec![value])
    }

    /// `path < value`
    pub fn lt(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Lt, vec![value])
    }

    /// `path <= value`
    pub fn le(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Le, vec![value])
    }

    /// `path > value`
    pub fn gt(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Gt, vec![value])
    }

    /// `path >= value`
    pub fn ge(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Ge, vec![value])
    }

    /// `path BETWEEN low AND high`
    pub fn between(path: impl Into<String>, low: AttributeValue, high: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Between, vec![low, high])
    }

    /// `begins_with(path, prefix)`
    pub fn begins_with(path: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::cond(
            path,
            FilterOperator::BeginsWith,
            vec![AttributeValue::s(prefix)],
        )
    }

    /// `contains(path, value)`
    pub fn contains(path: impl Into<String>, value: AttributeValue) -> Self {
        Self::cond(path, FilterOperator::Contains, vec![value])
    }

    /// `path IN (v1, v2, …)`
    pub fn is_in(path: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self::cond(path, FilterOperator::In, values)
    }

    /// `attribute_exists(path)`
    pub fn exists(path: impl Into<String>) -> Self {
        Self::cond(path, FilterOperator::Exists, vec![])
    }

    /// `attribute_not_exists(path)`
    pub fn not_exists(path: impl Into<String>) -> Self {
        Self::cond(path, FilterOperator::NotExists, vec![])
    }

    /// Conjunction of this filter with another.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut group) => {
                group.push(other);
                Filter::And(group)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Disjunction of this filter with another.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut group) => {
                group.push(other);
                Filter::Or(group)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Every leaf path mentioned in the tree, in declaration order.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Cond(cond) => out.push(cond.path.as_str()),
            Filter::And(group) | Filter::Or(group) => {
                for member in group {
                    member.collect_paths(out);
                }
            }
        }
    }
}

/// Sort direction of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_left_chain() {
        let f = Filter::eq("a", AttributeValue::n(1))
            .and(Filter::gt("b", AttributeValue::n(2)))
            .and(Filter::exists("c"));
        match f {
            Filter::And(group) => assert_eq!(group.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn paths_walks_nested_groups() {
        let f = Filter::eq("a", AttributeValue::n(1))
            .and(Filter::or(
                Filter::exists("b"),
                Filter::contains("c.d", AttributeValue::s("x")),
            ));
        assert_eq!(f.paths(), vec!["a", "b", "c.d"]);
    }

    #[test]
    fn operator_arity() {
        assert_eq!(FilterOperator::Between.arity(), Some(2));
        assert_eq!(FilterOperator::Exists.arity(), Some(0));
        assert_eq!(FilterOperator::In.arity(), None);
        assert_eq!(FilterOperator::Eq.arity(), Some(1));
    }
}
