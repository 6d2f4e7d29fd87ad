//! Interpreter for the expression grammar the compiler emits.
//!
//! The mock store evaluates the exact strings and placeholder maps a real
//! request would carry, so condition, key-condition, filter, and update
//! semantics are exercised end-to-end. The grammar is the compiler's
//! output, nothing more.

use std::cmp::Ordering;
use std::collections::HashMap;
use theorydb_core::{AttributeValue, Item, TheoryError, TheoryResult};

fn syntax_error(detail: impl Into<String>) -> TheoryError {
    TheoryError::InternalStoreError {
        code: Some("MockExpr".into()),
        message: detail.into(),
    }
}

// ============================================================================
// TOKENS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Attribute name, resolved through the `#nN` placeholder map
    Name(String),
    /// Value, resolved through the `:vN` placeholder map
    Value(AttributeValue),
    /// Bare word: function name, `AND`, `OR`, `BETWEEN`, `IN`, section
    /// keywords
    Word(String),
    /// Literal list index
    Index(u32),
    LParen,
    RParen,
    Comma,
    Dot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(
    input: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> TheoryResult<Vec<Tok>> {
    let mut toks = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            '[' => {
                let close = input[i..]
                    .find(']')
                    .ok_or_else(|| syntax_error("unterminated index"))?
                    + i;
                let digits = &input[i + 1..close];
                let index = digits
                    .parse()
                    .map_err(|_| syntax_error(format!("bad index {digits:?}")))?;
                toks.push(Tok::Index(index));
                i = close + 1;
            }
            '=' => {
                toks.push(Tok::Eq);
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '#' | ':' => {
                let end = input[i..]
                    .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '#' && ch != ':' && ch != '_')
                    .map(|off| i + off)
                    .unwrap_or(input.len());
                let placeholder = &input[i..end];
                if c == '#' {
                    let actual = names.get(placeholder).ok_or_else(|| {
                        syntax_error(format!("unbound name placeholder {placeholder}"))
                    })?;
                    toks.push(Tok::Name(actual.clone()));
                } else {
                    let value = values.get(placeholder).ok_or_else(|| {
                        syntax_error(format!("unbound value placeholder {placeholder}"))
                    })?;
                    toks.push(Tok::Value(value.clone()));
                }
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = input[i..]
                    .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
                    .map(|off| i + off)
                    .unwrap_or(input.len());
                toks.push(Tok::Word(input[i..end].to_string()));
                i = end;
            }
            other => return Err(syntax_error(format!("unexpected character {other:?}"))),
        }
    }
    Ok(toks)
}

// ============================================================================
// PATHS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seg {
    Attr(String),
    Index(u32),
}

pub(crate) fn resolve<'a>(item: &'a Item, path: &[Seg]) -> Option<&'a AttributeValue> {
    let mut current: Option<&AttributeValue> = match &path[0] {
        Seg::Attr(name) => item.get(name),
        Seg::Index(_) => None,
    };
    for seg in &path[1..] {
        current = match (current, seg) {
            (Some(AttributeValue::M(map)), Seg::Attr(name)) => map.get(name),
            (Some(AttributeValue::L(list)), Seg::Index(index)) => list.get(*index as usize),
            _ => None,
        };
    }
    current
}

fn set_path(item: &mut Item, path: &[Seg], value: AttributeValue) -> TheoryResult<()> {
    match path {
        [Seg::Attr(name)] => {
            item.insert(name.clone(), value);
            Ok(())
        }
        [Seg::Attr(name), rest @ ..] => {
            let slot = item
                .get_mut(name)
                .ok_or_else(|| syntax_error(format!("document path {name:?} is absent")))?;
            set_nested(slot, rest, value)
        }
        _ => Err(syntax_error("path must start with an attribute")),
    }
}

fn set_nested(slot: &mut AttributeValue, path: &[Seg], value: AttributeValue) -> TheoryResult<()> {
    match path {
        [] => {
            *slot = value;
            Ok(())
        }
        [Seg::Attr(name), rest @ ..] => match slot {
            AttributeValue::M(map) => {
                if rest.is_empty() {
                    map.insert(name.clone(), value);
                    Ok(())
                } else {
                    let next = map
                        .get_mut(name)
                        .ok_or_else(|| syntax_error(format!("document path {name:?} is absent")))?;
                    set_nested(next, rest, value)
                }
            }
            _ => Err(syntax_error("document path traverses a non-map")),
        },
        [Seg::Index(index), rest @ ..] => match slot {
            AttributeValue::L(list) => {
                let index = *index as usize;
                if rest.is_empty() {
                    // Past-the-end assignment appends, as the store does.
                    if index >= list.len() {
                        list.push(value);
                    } else {
                        list[index] = value;
                    }
                    Ok(())
                } else {
                    let next = list
                        .get_mut(index)
                        .ok_or_else(|| syntax_error("list index out of range"))?;
                    set_nested(next, rest, value)
                }
            }
            _ => Err(syntax_error("index applied to a non-list")),
        },
    }
}

fn remove_path(item: &mut Item, path: &[Seg]) {
    match path {
        [Seg::Attr(name)] => {
            item.remove(name);
        }
        [Seg::Attr(name), rest @ ..] => {
            if let Some(slot) = item.get_mut(name) {
                remove_nested(slot, rest);
            }
        }
        _ => {}
    }
}

fn remove_nested(slot: &mut AttributeValue, path: &[Seg]) {
    match path {
        [Seg::Attr(name)] => {
            if let AttributeValue::M(map) = slot {
                map.remove(name);
            }
        }
        [Seg::Index(index)] => {
            if let AttributeValue::L(list) = slot {
                let index = *index as usize;
                if index < list.len() {
                    list.remove(index);
                }
            }
        }
        [Seg::Attr(name), rest @ ..] => {
            if let AttributeValue::M(map) = slot {
                if let Some(next) = map.get_mut(name) {
                    remove_nested(next, rest);
                }
            }
        }
        [Seg::Index(index), rest @ ..] => {
            if let AttributeValue::L(list) = slot {
                if let Some(next) = list.get_mut(*index as usize) {
                    remove_nested(next, rest);
                }
            }
        }
        [] => {}
    }
}

// ============================================================================
// CONDITION EVALUATION
// ============================================================================

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, tok: &Tok) -> TheoryResult<()> {
        match self.next() {
            Some(found) if found == *tok => Ok(()),
            found => Err(syntax_error(format!("expected {tok:?}, found {found:?}"))),
        }
    }

    fn expect_word(&mut self, word: &str) -> TheoryResult<()> {
        match self.next() {
            Some(Tok::Word(found)) if found == word => Ok(()),
            found => Err(syntax_error(format!("expected {word}, found {found:?}"))),
        }
    }

    fn parse_path(&mut self, first: String) -> TheoryResult<Vec<Seg>> {
        let mut segs = vec![Seg::Attr(first)];
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Tok::Name(name)) => segs.push(Seg::Attr(name)),
                        found => {
                            return Err(syntax_error(format!(
                                "expected name after '.', found {found:?}"
                            )))
                        }
                    }
                }
                Some(Tok::Index(_)) => {
                    if let Some(Tok::Index(index)) = self.next() {
                        segs.push(Seg::Index(index));
                    }
                }
                _ => return Ok(segs),
            }
        }
    }

    fn parse_value(&mut self) -> TheoryResult<AttributeValue> {
        match self.next() {
            Some(Tok::Value(value)) => Ok(value),
            found => Err(syntax_error(format!("expected value, found {found:?}"))),
        }
    }
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            let a: f64 = a.parse().ok()?;
            let b: f64 = b.parse().ok()?;
            a.partial_cmp(&b)
        }
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn eval_begins_with(target: Option<&AttributeValue>, prefix: &AttributeValue) -> bool {
    match (target, prefix) {
        (Some(AttributeValue::S(s)), AttributeValue::S(p)) => s.starts_with(p.as_str()),
        (Some(AttributeValue::B(b)), AttributeValue::S(p)) => b.starts_with(p.as_bytes()),
        (Some(AttributeValue::B(b)), AttributeValue::B(p)) => b.starts_with(p),
        _ => false,
    }
}

fn eval_contains(target: Option<&AttributeValue>, member: &AttributeValue) -> bool {
    match target {
        Some(AttributeValue::S(s)) => member
            .as_s()
            .map(|m| s.contains(m))
            .unwrap_or(false),
        Some(AttributeValue::Ss(set)) => member
            .as_s()
            .map(|m| set.iter().any(|s| s == m))
            .unwrap_or(false),
        Some(AttributeValue::Ns(set)) => member
            .as_n()
            .map(|m| set.iter().any(|n| n == m))
            .unwrap_or(false),
        Some(AttributeValue::Bs(set)) => member
            .as_b()
            .map(|m| set.iter().any(|b| b == m))
            .unwrap_or(false),
        Some(AttributeValue::L(list)) => list.iter().any(|v| v == member),
        _ => false,
    }
}

/// Evaluate a condition, key-condition, or filter expression against an
/// item (`None` means the slot is empty, as conditional creates see it).
pub(crate) fn eval_condition(
    expr: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
    item: Option<&Item>,
) -> TheoryResult<bool> {
    let toks = tokenize(expr, names, values)?;
    let mut parser = Parser { toks, pos: 0 };
    let result = parse_or(&mut parser, item)?;
    if parser.peek().is_some() {
        return Err(syntax_error("trailing tokens in condition"));
    }
    Ok(result)
}

fn parse_or(parser: &mut Parser, item: Option<&Item>) -> TheoryResult<bool> {
    let mut result = parse_and(parser, item)?;
    while matches!(parser.peek(), Some(Tok::Word(w)) if w == "OR") {
        parser.next();
        let rhs = parse_and(parser, item)?;
        result = result || rhs;
    }
    Ok(result)
}

fn parse_and(parser: &mut Parser, item: Option<&Item>) -> TheoryResult<bool> {
    let mut result = parse_primary(parser, item)?;
    while matches!(parser.peek(), Some(Tok::Word(w)) if w == "AND") {
        parser.next();
        let rhs = parse_primary(parser, item)?;
        result = result && rhs;
    }
    Ok(result)
}

fn parse_primary(parser: &mut Parser, item: Option<&Item>) -> TheoryResult<bool> {
    match parser.next() {
        Some(Tok::LParen) => {
            let result = parse_or(parser, item)?;
            parser.expect(&Tok::RParen)?;
            Ok(result)
        }
        Some(Tok::Word(func)) => {
            parser.expect(&Tok::LParen)?;
            let path = match parser.next() {
                Some(Tok::Name(name)) => parser.parse_path(name)?,
                found => {
                    return Err(syntax_error(format!(
                        "expected path in {func}(), found {found:?}"
                    )))
                }
            };
            let target = item.and_then(|item| resolve(item, &path));
            let result = match func.as_str() {
                "attribute_exists" => {
                    parser.expect(&Tok::RParen)?;
                    target.is_some()
                }
                "attribute_not_exists" => {
                    parser.expect(&Tok::RParen)?;
                    target.is_none()
                }
                "begins_with" => {
                    parser.expect(&Tok::Comma)?;
                    let prefix = parser.parse_value()?;
                    parser.expect(&Tok::RParen)?;
                    eval_begins_with(target, &prefix)
                }
                "contains" => {
                    parser.expect(&Tok::Comma)?;
                    let member = parser.parse_value()?;
                    parser.expect(&Tok::RParen)?;
                    eval_contains(target, &member)
                }
                other => return Err(syntax_error(format!("unknown function {other}"))),
            };
            Ok(result)
        }
        Some(Tok::Name(name)) => {
            let path = parser.parse_path(name)?;
            let target = item.and_then(|item| resolve(item, &path));
            match parser.next() {
                Some(Tok::Eq) => Ok(target == Some(&parser.parse_value()?)),
                Some(Tok::Ne) => Ok(target != Some(&parser.parse_value()?)),
                Some(op @ (Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge)) => {
                    let rhs = parser.parse_value()?;
                    let ordering = match target {
                        Some(value) => compare(value, &rhs),
                        None => None,
                    };
                    Ok(match (op, ordering) {
                        (_, None) => false,
                        (Tok::Lt, Some(o)) => o == Ordering::Less,
                        (Tok::Le, Some(o)) => o != Ordering::Greater,
                        (Tok::Gt, Some(o)) => o == Ordering::Greater,
                        (Tok::Ge, Some(o)) => o != Ordering::Less,
                        _ => false,
                    })
                }
                Some(Tok::Word(w)) if w == "BETWEEN" => {
                    let low = parser.parse_value()?;
                    parser.expect_word("AND")?;
                    let high = parser.parse_value()?;
                    Ok(match target {
                        Some(value) => {
                            compare(value, &low).map(|o| o != Ordering::Less).unwrap_or(false)
                                && compare(value, &high)
                                    .map(|o| o != Ordering::Greater)
                                    .unwrap_or(false)
                        }
                        None => false,
                    })
                }
                Some(Tok::Word(w)) if w == "IN" => {
                    parser.expect(&Tok::LParen)?;
                    let mut found = false;
                    loop {
                        let candidate = parser.parse_value()?;
                        if target == Some(&candidate) {
                            found = true;
                        }
                        match parser.next() {
                            Some(Tok::Comma) => continue,
                            Some(Tok::RParen) => break,
                            found => {
                                return Err(syntax_error(format!(
                                    "expected ',' or ')', found {found:?}"
                                )))
                            }
                        }
                    }
                    Ok(found)
                }
                found => Err(syntax_error(format!("expected operator, found {found:?}"))),
            }
        }
        found => Err(syntax_error(format!("unexpected token {found:?}"))),
    }
}

// ============================================================================
// UPDATE APPLICATION
// ============================================================================

/// Apply an update expression to an item in place.
pub(crate) fn apply_update(
    expr: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
    item: &mut Item,
) -> TheoryResult<()> {
    let toks = tokenize(expr, names, values)?;
    let mut parser = Parser { toks, pos: 0 };
    while let Some(tok) = parser.next() {
        let section = match tok {
            Tok::Word(word) => word,
            found => return Err(syntax_error(format!("expected section, found {found:?}"))),
        };
        match section.as_str() {
            "SET" => apply_set_section(&mut parser, item)?,
            "REMOVE" => apply_remove_section(&mut parser, item)?,
            "ADD" => apply_add_section(&mut parser, item)?,
            "DELETE" => apply_delete_section(&mut parser, item)?,
            other => return Err(syntax_error(format!("unknown section {other}"))),
        }
    }
    Ok(())
}

/// A section ends at the next section keyword or the end of input; bare
/// words only ever appear as section keywords at this position.
fn section_done(parser: &Parser) -> bool {
    matches!(parser.peek(), None | Some(Tok::Word(_)))
}

fn parse_target_path(parser: &mut Parser) -> TheoryResult<Vec<Seg>> {
    match parser.next() {
        Some(Tok::Name(name)) => parser.parse_path(name),
        found => Err(syntax_error(format!("expected path, found {found:?}"))),
    }
}

/// An operand of a SET action: a resolved value.
fn parse_set_operand(parser: &mut Parser, item: &Item) -> TheoryResult<AttributeValue> {
    match parser.next() {
        Some(Tok::Value(value)) => Ok(value),
        Some(Tok::Name(name)) => {
            let path = parser.parse_path(name)?;
            resolve(item, &path)
                .cloned()
                .ok_or_else(|| syntax_error("operand path is absent"))
        }
        Some(Tok::Word(func)) if func == "if_not_exists" => {
            parser.expect(&Tok::LParen)?;
            let path = parse_target_path(parser)?;
            parser.expect(&Tok::Comma)?;
            let fallback = parser.parse_value()?;
            parser.expect(&Tok::RParen)?;
            Ok(resolve(item, &path).cloned().unwrap_or(fallback))
        }
        Some(Tok::Word(func)) if func == "list_append" => {
            parser.expect(&Tok::LParen)?;
            let left = parse_set_operand(parser, item)?;
            parser.expect(&Tok::Comma)?;
            let right = parse_set_operand(parser, item)?;
            parser.expect(&Tok::RParen)?;
            match (left, right) {
                (AttributeValue::L(mut left), AttributeValue::L(right)) => {
                    left.extend(right);
                    Ok(AttributeValue::L(left))
                }
                _ => Err(syntax_error("list_append operands must be lists")),
            }
        }
        found => Err(syntax_error(format!("unexpected SET operand {found:?}"))),
    }
}

fn apply_set_section(parser: &mut Parser, item: &mut Item) -> TheoryResult<()> {
    loop {
        let path = parse_target_path(parser)?;
        parser.expect(&Tok::Eq)?;
        let value = parse_set_operand(parser, item)?;
        set_path(item, &path, value)?;
        match parser.peek() {
            Some(Tok::Comma) => {
                parser.next();
            }
            _ if section_done(parser) => return Ok(()),
            found => return Err(syntax_error(format!("unexpected token {found:?} in SET"))),
        }
    }
}

fn apply_remove_section(parser: &mut Parser, item: &mut Item) -> TheoryResult<()> {
    loop {
        let path = parse_target_path(parser)?;
        remove_path(item, &path);
        match parser.peek() {
            Some(Tok::Comma) => {
                parser.next();
            }
            _ if section_done(parser) => return Ok(()),
            found => return Err(syntax_error(format!("unexpected token {found:?} in REMOVE"))),
        }
    }
}

fn apply_add_section(parser: &mut Parser, item: &mut Item) -> TheoryResult<()> {
    loop {
        let path = parse_target_path(parser)?;
        let operand = parser.parse_value()?;
        let current = resolve(item, &path).cloned();
        let next = match (current, operand) {
            (None, operand) => operand,
            (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
                AttributeValue::N(add_numbers(&a, &b)?)
            }
            (Some(AttributeValue::Ss(mut a)), AttributeValue::Ss(b)) => {
                for member in b {
                    if !a.contains(&member) {
                        a.push(member);
                    }
                }
                AttributeValue::Ss(a)
            }
            (Some(AttributeValue::Ns(mut a)), AttributeValue::Ns(b)) => {
                for member in b {
                    if !a.contains(&member) {
                        a.push(member);
                    }
                }
                AttributeValue::Ns(a)
            }
            (Some(AttributeValue::Bs(mut a)), AttributeValue::Bs(b)) => {
                for member in b {
                    if !a.contains(&member) {
                        a.push(member);
                    }
                }
                AttributeValue::Bs(a)
            }
            _ => return Err(syntax_error("ADD applies to numbers and sets")),
        };
        set_path(item, &path, next)?;
        match parser.peek() {
            Some(Tok::Comma) => {
                parser.next();
            }
            _ if section_done(parser) => return Ok(()),
            found => return Err(syntax_error(format!("unexpected token {found:?} in ADD"))),
        }
    }
}

fn apply_delete_section(parser: &mut Parser, item: &mut Item) -> TheoryResult<()> {
    loop {
        let path = parse_target_path(parser)?;
        let operand = parser.parse_value()?;
        let next = match (resolve(item, &path).cloned(), operand) {
            (Some(AttributeValue::Ss(a)), AttributeValue::Ss(b)) => {
                Some(AttributeValue::Ss(a.into_iter().filter(|m| !b.contains(m)).collect()))
            }
            (Some(AttributeValue::Ns(a)), AttributeValue::Ns(b)) => {
                Some(AttributeValue::Ns(a.into_iter().filter(|m| !b.contains(m)).collect()))
            }
            (Some(AttributeValue::Bs(a)), AttributeValue::Bs(b)) => {
                Some(AttributeValue::Bs(a.into_iter().filter(|m| !b.contains(m)).collect()))
            }
            (None, _) => None,
            _ => return Err(syntax_error("DELETE applies to sets")),
        };
        match next {
            // The store removes a set attribute that became empty.
            Some(next) if next.is_empty() => remove_path(item, &path),
            Some(next) => set_path(item, &path, next)?,
            None => {}
        }
        match parser.peek() {
            Some(Tok::Comma) => {
                parser.next();
            }
            _ if section_done(parser) => return Ok(()),
            found => return Err(syntax_error(format!("unexpected token {found:?} in DELETE"))),
        }
    }
}

fn add_numbers(a: &str, b: &str) -> TheoryResult<String> {
    if let (Ok(a), Ok(b)) = (a.parse::<i64>(), b.parse::<i64>()) {
        return Ok((a + b).to_string());
    }
    let a: f64 = a.parse().map_err(|_| syntax_error("malformed number"))?;
    let b: f64 = b.parse().map_err(|_| syntax_error("malformed number"))?;
    let sum = a + b;
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Ok((sum as i64).to_string())
    } else {
        Ok(sum.to_string())
    }
}
