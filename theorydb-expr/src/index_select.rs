//! Index selection for queries.

use theorydb_core::{ModelDescriptor, TheoryError, TheoryResult};

/// The key layout a query will run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSelection {
    /// `None` targets the base table.
    pub index: Option<String>,
}

impl IndexSelection {
    fn table() -> Self {
        Self { index: None }
    }

    fn index(name: &str) -> Self {
        Self {
            index: Some(name.to_string()),
        }
    }
}

/// Choose the table or index a predicate should query.
///
/// An explicit index name short-circuits (it must exist and its partition
/// key must match). Otherwise candidates whose partition and sort keys
/// exactly match the predicate attributes win, the base table first; if
/// several indexes remain equally exact, the caller must name one.
pub fn select_index(
    descriptor: &ModelDescriptor,
    partition_attr: &str,
    sort_attr: Option<&str>,
    explicit: Option<&str>,
) -> TheoryResult<IndexSelection> {
    if let Some(name) = explicit {
        let index = descriptor.index(name).ok_or_else(|| TheoryError::InvalidModel {
            model: descriptor.name.clone(),
            reason: format!("index {name:?} is not declared"),
        })?;
        if index.partition != partition_attr {
            return Err(TheoryError::InvalidOperator {
                operator: "query".into(),
                path: partition_attr.to_string(),
                reason: format!(
                    "index {name:?} is keyed by {:?}, not {partition_attr:?}",
                    index.partition
                ),
            });
        }
        if let Some(sort) = sort_attr {
            if index.sort.as_deref() != Some(sort) {
                return Err(TheoryError::InvalidOperator {
                    operator: "query".into(),
                    path: sort.to_string(),
                    reason: format!("index {name:?} has no such sort key"),
                });
            }
        }
        return Ok(IndexSelection::index(name));
    }

    let table_partition_matches = descriptor.keys.partition == partition_attr;
    let table_sort = descriptor.keys.sort.as_deref();

    // Exact: partition and sort keys equal the predicate attributes.
    if table_partition_matches && table_sort == sort_attr {
        return Ok(IndexSelection::table());
    }
    let exact: Vec<&str> = descriptor
        .indexes
        .iter()
        .filter(|ix| ix.partition == partition_attr && ix.sort.as_deref() == sort_attr)
        .map(|ix| ix.name.as_str())
        .collect();
    match exact.len() {
        1 => return Ok(IndexSelection::index(exact[0])),
        n if n > 1 => {
            return Err(TheoryError::AmbiguousIndex {
                model: descriptor.name.clone(),
                candidates: exact.iter().map(|s| s.to_string()).collect(),
            })
        }
        _ => {}
    }

    // Partial: partition matches and the predicate has no sort attribute.
    if sort_attr.is_none() {
        if table_partition_matches {
            return Ok(IndexSelection::table());
        }
        let partial: Vec<&str> = descriptor
            .indexes
            .iter()
            .filter(|ix| ix.partition == partition_attr)
            .map(|ix| ix.name.as_str())
            .collect();
        match partial.len() {
            1 => return Ok(IndexSelection::index(partial[0])),
            n if n > 1 => {
                return Err(TheoryError::AmbiguousIndex {
                    model: descriptor.name.clone(),
                    candidates: partial.iter().map(|s| s.to_string()).collect(),
                })
            }
            _ => {}
        }
    }

    Err(TheoryError::InvalidOperator {
        operator: "query".into(),
        path: partition_attr.to_string(),
        reason: "no table or index key layout matches the predicate".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use theorydb_core::{AttributeType, ErrorKind, Projection};
    use theorydb_schema::{Attribute, DescriptorBuilder};

    fn descriptor() -> ModelDescriptor {
        DescriptorBuilder::new("Event", "events")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("sk", AttributeType::S).named("SK").sort())
            .attribute(
                Attribute::new("owner", AttributeType::S)
                    .index_partition("by-owner")
                    .index_partition("by-owner-date"),
            )
            .attribute(Attribute::new("date", AttributeType::S).index_sort("by-owner-date"))
            .global_index("by-owner", Projection::All)
            .global_index("by-owner-date", Projection::All)
            .build()
            .unwrap()
    }

    #[test]
    fn base_table_wins_on_exact_match() {
        let d = descriptor();
        let sel = select_index(&d, "PK", Some("SK"), None).unwrap();
        assert_eq!(sel.index, None);
    }

    #[test]
    fn exact_index_match_is_chosen() {
        let d = descriptor();
        let sel = select_index(&d, "owner", Some("date"), None).unwrap();
        assert_eq!(sel.index.as_deref(), Some("by-owner-date"));
    }

    #[test]
    fn partition_only_predicate_prefers_exact_layout() {
        let d = descriptor();
        // `by-owner` has no sort key, so it is the exact match for a bare
        // partition predicate even though `by-owner-date` also qualifies.
        let sel = select_index(&d, "owner", None, None).unwrap();
        assert_eq!(sel.index.as_deref(), Some("by-owner"));
    }

    #[test]
    fn ambiguity_requires_an_explicit_name() {
        let d = DescriptorBuilder::new("Event", "events")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(
                Attribute::new("owner", AttributeType::S)
                    .index_partition("a")
                    .index_partition("b"),
            )
            .attribute(
                Attribute::new("date", AttributeType::S)
                    .index_sort("a")
                    .index_sort("b"),
            )
            .global_index("a", Projection::All)
            .global_index("b", Projection::All)
            .build()
            .unwrap();
        let err = select_index(&d, "owner", Some("date"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousIndex);

        let sel = select_index(&d, "owner", Some("date"), Some("b")).unwrap();
        assert_eq!(sel.index.as_deref(), Some("b"));
    }

    #[test]
    fn explicit_index_must_fit_the_predicate() {
        let d = descriptor();
        let err = select_index(&d, "PK", None, Some("by-owner")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);
        let err = select_index(&d, "owner", None, Some("ghost")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn unmatched_predicate_fails() {
        let d = descriptor();
        let err = select_index(&d, "date", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperator);
    }
}
