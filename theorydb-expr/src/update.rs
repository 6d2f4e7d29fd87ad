//! Update-expression building and compilation.

use crate::buffer::ExprBuffer;
use crate::filter::check_path;
use crate::path::Path;
use crate::ExprTarget;
use theorydb_core::{
    AttributeDescriptor, AttributeType, AttributeValue, TheoryError, TheoryResult,
};

/// Operand of `list_append`: an existing list attribute or a literal list.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOperand {
    Path(String),
    Value(AttributeValue),
}

/// Right-hand side of one `SET` action.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// `path = value`
    Value(AttributeValue),
    /// `path = if_not_exists(path, value)`
    IfNotExists(AttributeValue),
    /// `path = list_append(left, right)`
    ListAppend { left: ListOperand, right: ListOperand },
}

/// An update request: the four store sections, in builder form.
///
/// Paths accept list indices (`items[2]`), so one element can be replaced
/// or removed in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub sets: Vec<(String, SetValue)>,
    pub removes: Vec<String>,
    pub adds: Vec<(String, AttributeValue)>,
    pub deletes: Vec<(String, AttributeValue)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SET path = value`
    pub fn set(mut self, path: impl Into<String>, value: AttributeValue) -> Self {
        self.sets.push((path.into(), SetValue::Value(value)));
        self
    }

    /// `SET path = if_not_exists(path, value)`
    pub fn set_if_not_exists(mut self, path: impl Into<String>, value: AttributeValue) -> Self {
        self.sets.push((path.into(), SetValue::IfNotExists(value)));
        self
    }

    /// `SET path = list_append(path, values)`
    pub fn append(mut self, path: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        let path = path.into();
        self.sets.push((
            path.clone(),
            SetValue::ListAppend {
                left: ListOperand::Path(path),
                right: ListOperand::Value(AttributeValue::L(values)),
            },
        ));
        self
    }

    /// `SET path = list_append(values, path)`
    pub fn prepend(mut self, path: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        let path = path.into();
        self.sets.push((
            path.clone(),
            SetValue::ListAppend {
                left: ListOperand::Value(AttributeValue::L(values)),
                right: ListOperand::Path(path),
            },
        ));
        self
    }

    /// `ADD path value` — numeric addition or set union.
    pub fn add(mut self, path: impl Into<String>, value: AttributeValue) -> Self {
        self.adds.push((path.into(), value));
        self
    }

    /// `DELETE path value` — set difference.
    pub fn delete(mut self, path: impl Into<String>, value: AttributeValue) -> Self {
        self.deletes.push((path.into(), value));
        self
    }

    /// `REMOVE path`
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.removes.push(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
            && self.removes.is_empty()
            && self.adds.is_empty()
            && self.deletes.is_empty()
    }

}

/// Compile an update into the store's four-section expression, rendered in
/// the fixed order `SET, REMOVE, ADD, DELETE`.
pub fn compile_update(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    update: &Update,
) -> TheoryResult<String> {
    if update.is_empty() {
        return Err(TheoryError::InvalidOperator {
            operator: "update".into(),
            path: String::new(),
            reason: "update has no actions".into(),
        });
    }

    let mut sections = Vec::new();

    if !update.sets.is_empty() {
        let mut parts = Vec::with_capacity(update.sets.len());
        for (raw, value) in &update.sets {
            let (path, attr) = update_path(target, raw, matches!(value, SetValue::Value(_)))?;
            check_set_operand(&path, attr, value)?;
            let rendered = buf.path(&path);
            parts.push(match value {
                SetValue::Value(v) => format!("{rendered} = {}", buf.value(v.clone())),
                SetValue::IfNotExists(v) => {
                    format!("{rendered} = if_not_exists({rendered}, {})", buf.value(v.clone()))
                }
                SetValue::ListAppend { left, right } => {
                    let left = render_list_operand(buf, target, left)?;
                    let right = render_list_operand(buf, target, right)?;
                    format!("{rendered} = list_append({left}, {right})")
                }
            });
        }
        sections.push(format!("SET {}", parts.join(", ")));
    }

    if !update.removes.is_empty() {
        let mut parts = Vec::with_capacity(update.removes.len());
        for raw in &update.removes {
            let (path, _) = update_path(target, raw, false)?;
            parts.push(buf.path(&path));
        }
        sections.push(format!("REMOVE {}", parts.join(", ")));
    }

    if !update.adds.is_empty() {
        let mut parts = Vec::with_capacity(update.adds.len());
        for (raw, value) in &update.adds {
            let (path, attr) = update_path(target, raw, false)?;
            check_add_operand(raw, &path, attr, value)?;
            parts.push(format!("{} {}", buf.path(&path), buf.value(value.clone())));
        }
        sections.push(format!("ADD {}", parts.join(", ")));
    }

    if !update.deletes.is_empty() {
        let mut parts = Vec::with_capacity(update.deletes.len());
        for (raw, value) in &update.deletes {
            let (path, attr) = update_path(target, raw, false)?;
            check_delete_operand(raw, &path, attr, value)?;
            parts.push(format!("{} {}", buf.path(&path), buf.value(value.clone())));
        }
        sections.push(format!("DELETE {}", parts.join(", ")));
    }

    Ok(sections.join(" "))
}

fn update_path<'a>(
    target: &ExprTarget<'a>,
    raw: &str,
    allow_encrypted: bool,
) -> TheoryResult<(Path, &'a AttributeDescriptor)> {
    let path = Path::parse(raw)?;
    let attr = check_path(target, &path, "update expression", allow_encrypted)?;
    if target.descriptor.keys.partition == path.root()
        || target.descriptor.keys.sort.as_deref() == Some(path.root())
    {
        return Err(TheoryError::InvalidOperator {
            operator: "update".into(),
            path: raw.to_string(),
            reason: "key attributes cannot be updated".into(),
        });
    }
    Ok((path, attr))
}

fn render_list_operand(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    operand: &ListOperand,
) -> TheoryResult<String> {
    match operand {
        ListOperand::Path(raw) => {
            let (path, _) = update_path(target, raw, false)?;
            Ok(buf.path(&path))
        }
        ListOperand::Value(value) => Ok(buf.value(value.clone())),
    }
}

fn check_set_operand(
    path: &Path,
    attr: &AttributeDescriptor,
    value: &SetValue,
) -> TheoryResult<()> {
    // Nested members and encrypted envelopes carry no declared type.
    if !path.is_root_only() || attr.modifiers.encrypted {
        return Ok(());
    }
    let fail = |got: &str, operator: &str| TheoryError::InvalidOperator {
        operator: operator.into(),
        path: attr.attribute.clone(),
        reason: format!(
            "operand of type {got} does not match declared type {}",
            attr.attr_type.code()
        ),
    };
    match value {
        SetValue::Value(v) | SetValue::IfNotExists(v) => {
            // NULL clears any attribute; numeric formats were coerced by the
            // codec before reaching the compiler.
            if !matches!(v, AttributeValue::Null) && v.type_code() != attr.attr_type.code() {
                return Err(fail(v.type_code(), "SET"));
            }
        }
        SetValue::ListAppend { left, right } => {
            if attr.attr_type != AttributeType::L {
                return Err(TheoryError::InvalidOperator {
                    operator: "list_append".into(),
                    path: attr.attribute.clone(),
                    reason: format!(
                        "list_append applies to lists, not type {}",
                        attr.attr_type.code()
                    ),
                });
            }
            for operand in [left, right] {
                if let ListOperand::Value(v) = operand {
                    if !matches!(v, AttributeValue::L(_)) {
                        return Err(fail(v.type_code(), "list_append"));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_add_operand(
    raw: &str,
    path: &Path,
    attr: &AttributeDescriptor,
    value: &AttributeValue,
) -> TheoryResult<()> {
    if !path.is_root_only() {
        return Ok(());
    }
    let ok = match attr.attr_type {
        AttributeType::N => value.as_n().is_some(),
        AttributeType::Ss => matches!(value, AttributeValue::Ss(_)),
        AttributeType::Ns => matches!(value, AttributeValue::Ns(_)),
        AttributeType::Bs => matches!(value, AttributeValue::Bs(_)),
        _ => false,
    };
    if !ok {
        return Err(TheoryError::InvalidOperator {
            operator: "ADD".into(),
            path: raw.to_string(),
            reason: format!(
                "ADD applies to numbers and sets, not {} on type {}",
                value.type_code(),
                attr.attr_type.code()
            ),
        });
    }
    Ok(())
}

fn check_delete_operand(
    raw: &str,
    path: &Path,
    attr: &AttributeDescriptor,
    value: &AttributeValue,
) -> TheoryResult<()> {
    if !path.is_root_only() {
        return Ok(());
    }
    let ok = match attr.attr_type {
        AttributeType::Ss => matches!(value, AttributeValue::Ss(_)),
        AttributeType::Ns => matches!(value, AttributeValue::Ns(_)),
        AttributeType::Bs => matches!(value, AttributeValue::Bs(_)),
        _ => false,
    };
    if !ok {
        return Err(TheoryError::InvalidOperator {
            operator: "DELETE".into(),
            path: raw.to_string(),
            reason: "DELETE applies to set attributes with a matching set operand".into(),
        });
    }
    Ok(())
}
