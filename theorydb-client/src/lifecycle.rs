//! Lifecycle stamping: timestamps, version seeding, TTL coercion.

use chrono::{DateTime, SecondsFormat, Utc};
use theorydb_core::{
    AttributeRole, AttributeValue, Item, ModelDescriptor, TheoryError, TheoryResult,
};
use theorydb_expr::{SetValue, Update};

/// Time source for lifecycle timestamps. Injectable so tests are
/// deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The stored rendering of a lifecycle timestamp.
pub fn rfc3339_nano(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Stamp an encoded item for create/put: both timestamps are set to `now`,
/// and an empty or absent version seeds at `0`.
pub(crate) fn stamp_create(descriptor: &ModelDescriptor, item: &mut Item, now: DateTime<Utc>) {
    let stamp = AttributeValue::S(rfc3339_nano(now));
    for role in [AttributeRole::CreatedAt, AttributeRole::UpdatedAt] {
        if let Some(attr) = descriptor.attribute_by_role(&role) {
            item.insert(attr.attribute.clone(), stamp.clone());
        }
    }
    if let Some(attr) = descriptor.attribute_by_role(&AttributeRole::Version) {
        let seeded = item
            .get(&attr.attribute)
            .map(|v| v.is_empty())
            .unwrap_or(true);
        if seeded {
            item.insert(attr.attribute.clone(), AttributeValue::n(0));
        }
    }
}

/// Extend an update for the lifecycle contract: `updated_at` is set to
/// `now` and, when the model versions, the counter is atomically advanced.
/// The matching `version = provided` guard is compiled by the dispatcher.
pub(crate) fn stamp_update(
    descriptor: &ModelDescriptor,
    mut update: Update,
    now: DateTime<Utc>,
) -> Update {
    if let Some(attr) = descriptor.attribute_by_role(&AttributeRole::UpdatedAt) {
        update = update.set(
            attr.attribute.clone(),
            AttributeValue::S(rfc3339_nano(now)),
        );
    }
    if let Some(attr) = descriptor.attribute_by_role(&AttributeRole::Version) {
        update = update.add(attr.attribute.clone(), AttributeValue::n(1));
    }
    update
}

/// Coerce TTL set-values in an update to integer epoch seconds, whatever
/// convenience form the caller used.
pub(crate) fn coerce_update_ttl(
    descriptor: &ModelDescriptor,
    update: &mut Update,
) -> TheoryResult<()> {
    let ttl_attr = match descriptor.attribute_by_role(&AttributeRole::Ttl) {
        Some(attr) => attr.attribute.clone(),
        None => return Ok(()),
    };
    for (path, value) in update.sets.iter_mut() {
        if *path != ttl_attr {
            continue;
        }
        if let SetValue::Value(v) | SetValue::IfNotExists(v) = value {
            *v = coerce_ttl_value(descriptor, &ttl_attr, v)?;
        }
    }
    Ok(())
}

fn coerce_ttl_value(
    descriptor: &ModelDescriptor,
    attribute: &str,
    value: &AttributeValue,
) -> TheoryResult<AttributeValue> {
    let invalid = || TheoryError::InvalidModel {
        model: descriptor.name.clone(),
        reason: format!(
            "attribute {attribute:?} expects epoch seconds or an RFC 3339 timestamp"
        ),
    };
    match value {
        AttributeValue::N(n) => {
            if n.parse::<i64>().is_ok() {
                Ok(value.clone())
            } else {
                let f: f64 = n.parse().map_err(|_| invalid())?;
                Ok(AttributeValue::n(f.trunc() as i64))
            }
        }
        AttributeValue::S(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| AttributeValue::n(dt.timestamp()))
            .map_err(|_| invalid()),
        AttributeValue::Null => Ok(AttributeValue::Null),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use theorydb_core::AttributeType;
    use theorydb_schema::{Attribute, DescriptorBuilder};

    fn descriptor() -> ModelDescriptor {
        DescriptorBuilder::new("User", "users")
            .attribute(Attribute::new("pk", AttributeType::S).named("PK").partition())
            .attribute(Attribute::new("created_at", AttributeType::S).created_at())
            .attribute(Attribute::new("updated_at", AttributeType::S).updated_at())
            .attribute(Attribute::new("version", AttributeType::N).version())
            .attribute(Attribute::new("expires", AttributeType::N).ttl())
            .build()
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn nano_rendering_is_fixed_width() {
        assert_eq!(rfc3339_nano(now()), "2026-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn create_stamps_timestamps_and_seeds_version() {
        let descriptor = descriptor();
        let mut item = Item::new();
        item.insert("PK".into(), AttributeValue::s("U#1"));
        stamp_create(&descriptor, &mut item, now());
        assert_eq!(
            item["createdAt"],
            AttributeValue::s("2026-01-01T00:00:00.000000000Z")
        );
        assert_eq!(item["updatedAt"], item["createdAt"]);
        assert_eq!(item["version"], AttributeValue::n(0));
    }

    #[test]
    fn create_keeps_a_nonzero_version() {
        let descriptor = descriptor();
        let mut item = Item::new();
        item.insert("version".into(), AttributeValue::n(7));
        stamp_create(&descriptor, &mut item, now());
        assert_eq!(item["version"], AttributeValue::n(7));
    }

    #[test]
    fn update_sets_timestamp_and_advances_version() {
        let descriptor = descriptor();
        let update = stamp_update(&descriptor, Update::new().set("expires", AttributeValue::n(1)), now());
        assert!(update
            .sets
            .iter()
            .any(|(path, _)| path == "updatedAt"));
        assert!(update.adds.iter().any(|(path, _)| path == "version"));
    }

    #[test]
    fn ttl_coercion_accepts_convenience_forms() {
        let descriptor = descriptor();
        let mut update = Update::new().set(
            "expires",
            AttributeValue::s("2026-01-01T00:00:00Z"),
        );
        coerce_update_ttl(&descriptor, &mut update).unwrap();
        assert_eq!(
            update.sets[0].1,
            SetValue::Value(AttributeValue::n(1_767_225_600i64))
        );

        let mut update = Update::new().set("expires", AttributeValue::N("99.9".into()));
        coerce_update_ttl(&descriptor, &mut update).unwrap();
        assert_eq!(update.sets[0].1, SetValue::Value(AttributeValue::n(99)));
    }
}
