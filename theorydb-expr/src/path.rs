//! Attribute path parsing and validation.

use once_cell::sync::Lazy;
use regex::Regex;
use theorydb_core::{TheoryError, TheoryResult};

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles"));

/// One step of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Map member access by name
    Attr(String),
    /// List element access by non-negative literal index
    Index(u32),
}

/// A validated attribute path: `root`, `root.nested`, `root[3].member`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<PathSegment>,
}

impl Path {
    /// Parse and validate a path string.
    ///
    /// Identifiers must match `[A-Za-z_][A-Za-z0-9_]*`; indices are bare
    /// non-negative integers. Nothing else — no quoting, no arithmetic, no
    /// expressions — so user input cannot smuggle syntax into the rendered
    /// expression.
    pub fn parse(input: &str) -> TheoryResult<Self> {
        let invalid = |reason: String| TheoryError::InvalidOperator {
            operator: "path".into(),
            path: input.to_string(),
            reason,
        };

        if input.is_empty() {
            return Err(invalid("path is empty".into()));
        }

        let mut segments = Vec::new();
        let mut rest = input;
        let mut expect_attr = true;
        while !rest.is_empty() {
            if expect_attr {
                let end = rest
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(rest.len());
                let ident = &rest[..end];
                if !IDENT_RE.is_match(ident) {
                    return Err(invalid(format!("invalid identifier {ident:?}")));
                }
                segments.push(PathSegment::Attr(ident.to_string()));
                rest = &rest[end..];
                expect_attr = false;
            } else if let Some(stripped) = rest.strip_prefix('.') {
                rest = stripped;
                expect_attr = true;
                if rest.is_empty() {
                    return Err(invalid("path ends with '.'".into()));
                }
            } else if let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped
                    .find(']')
                    .ok_or_else(|| invalid("unterminated index".into()))?;
                let digits = &stripped[..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid(format!("invalid list index {digits:?}")));
                }
                let index: u32 = digits
                    .parse()
                    .map_err(|_| invalid(format!("list index {digits:?} out of range")))?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 2..];
            } else {
                return Err(invalid(format!("unexpected character at {rest:?}")));
            }
        }
        if expect_attr && segments.is_empty() {
            return Err(invalid("path is empty".into()));
        }

        Ok(Self { segments })
    }

    /// The root attribute name.
    pub fn root(&self) -> &str {
        match &self.segments[0] {
            PathSegment::Attr(ident) => ident,
            PathSegment::Index(_) => unreachable!("paths always start with an identifier"),
        }
    }

    /// Whether the path is a bare attribute with no traversal.
    pub fn is_root_only(&self) -> bool {
        self.segments.len() == 1
    }

    /// The second segment, used to check traversal against the declared
    /// root structure.
    pub fn first_step(&self) -> Option<&PathSegment> {
        self.segments.get(1)
    }
}
