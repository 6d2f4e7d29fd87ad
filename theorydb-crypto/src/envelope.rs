//! The stored envelope shape.

use bytes::Bytes;
use std::collections::BTreeMap;
use theorydb_core::{AttributeValue, TheoryError, TheoryResult};

/// Current envelope format version.
pub const ENVELOPE_VERSION: i64 = 1;

/// The on-wire envelope of one encrypted attribute, stored as type `M`:
/// `v` (format version, `N`), `edk` (wrapped data key, `B`), `nonce`
/// (AEAD nonce, `B`), `ct` (ciphertext, `B`).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: i64,
    pub edk: Bytes,
    pub nonce: Bytes,
    pub ct: Bytes,
}

impl Envelope {
    /// Render as the stored attribute value.
    pub fn to_attribute(&self) -> AttributeValue {
        let mut map = BTreeMap::new();
        map.insert("v".to_string(), AttributeValue::n(self.version));
        map.insert("edk".to_string(), AttributeValue::B(self.edk.clone()));
        map.insert("nonce".to_string(), AttributeValue::B(self.nonce.clone()));
        map.insert("ct".to_string(), AttributeValue::B(self.ct.clone()));
        AttributeValue::M(map)
    }

    /// Parse a stored attribute value; any shape defect is a malformed
    /// envelope.
    pub fn from_attribute(attribute: &str, stored: &AttributeValue) -> TheoryResult<Self> {
        let malformed = || TheoryError::InvalidEncryptedEnvelope {
            attribute: attribute.to_string(),
        };
        let map = stored.as_m().ok_or_else(malformed)?;
        let version = map
            .get("v")
            .and_then(AttributeValue::as_i64)
            .ok_or_else(malformed)?;
        let field = |name: &str| -> TheoryResult<Bytes> {
            map.get(name)
                .and_then(AttributeValue::as_b)
                .cloned()
                .ok_or_else(malformed)
        };
        Ok(Self {
            version,
            edk: field("edk")?,
            nonce: field("nonce")?,
            ct: field("ct")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            version: ENVELOPE_VERSION,
            edk: Bytes::from_static(b"wrapped"),
            nonce: Bytes::from_static(&[0; 12]),
            ct: Bytes::from_static(b"sealed"),
        }
    }

    #[test]
    fn round_trips_through_attribute_form() {
        let env = envelope();
        let stored = env.to_attribute();
        assert_eq!(Envelope::from_attribute("secret", &stored).unwrap(), env);
    }

    #[test]
    fn shape_defects_are_malformed_envelopes() {
        let err = Envelope::from_attribute("secret", &AttributeValue::s("nope")).unwrap_err();
        assert!(matches!(err, TheoryError::InvalidEncryptedEnvelope { .. }));

        let mut stored = envelope().to_attribute();
        if let AttributeValue::M(map) = &mut stored {
            map.remove("nonce");
        }
        assert!(Envelope::from_attribute("secret", &stored).is_err());
    }
}
