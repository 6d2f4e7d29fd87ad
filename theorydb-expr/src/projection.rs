//! Projection-expression compilation.

use crate::buffer::ExprBuffer;
use crate::filter::check_path;
use crate::path::Path;
use crate::ExprTarget;
use theorydb_core::{TheoryError, TheoryResult};

/// Compile a projection from a list of attribute paths.
pub fn compile_projection(
    buf: &mut ExprBuffer,
    target: &ExprTarget<'_>,
    paths: &[String],
) -> TheoryResult<String> {
    if paths.is_empty() {
        return Err(TheoryError::InvalidOperator {
            operator: "projection".into(),
            path: String::new(),
            reason: "projection names no attributes".into(),
        });
    }
    let mut parts = Vec::with_capacity(paths.len());
    for raw in paths {
        let path = Path::parse(raw)?;
        check_path(target, &path, "projection", false)?;
        parts.push(buf.path(&path));
    }
    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use theorydb_core::{AttributeType, ErrorKind};
    use theorydb_schema::{Attribute, DescriptorBuilder};

    fn descriptor() -> theorydb_core::ModelDescriptor {
        DescriptorBuilder::new("Doc", "docs")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("title", AttributeType::S))
            .attribute(Attribute::new("meta", AttributeType::M))
            .attribute(Attribute::new("secret", AttributeType::S).encrypted())
            .build()
            .unwrap()
    }

    #[test]
    fn renders_comma_separated_placeholders() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let expr = compile_projection(
            &mut buf,
            &target,
            &["title".to_string(), "meta.color".to_string()],
        )
        .unwrap();
        assert_eq!(expr, "#n0, #n1.#n2");
    }

    #[test]
    fn encrypted_attributes_cannot_be_projected() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        let err =
            compile_projection(&mut buf, &target, &["secret".to_string()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncryptedFieldNotQueryable);
    }

    #[test]
    fn empty_projection_is_rejected() {
        let descriptor = descriptor();
        let target = ExprTarget::table(&descriptor);
        let mut buf = ExprBuffer::new();
        assert!(compile_projection(&mut buf, &target, &[]).is_err());
    }
}
