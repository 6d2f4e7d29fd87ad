//! Envelope sealing and opening.

use crate::envelope::{Envelope, ENVELOPE_VERSION};
use crate::keyservice::KeyService;
use crate::random::RandomSource;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use bytes::Bytes;
use std::sync::Arc;
use theorydb_codec::canonical_json;
use theorydb_core::{AttributeValue, TheoryError, TheoryResult};

/// AAD context prefix; the attribute name is appended so ciphertext is
/// bound to the attribute it was written as.
pub const ENCRYPTION_AAD_CONTEXT: &str = "theorydb:encrypted:v1";

const NONCE_LEN: usize = 12;
const DATA_KEY_LEN: usize = 32;

/// Seals and opens encrypted attributes for one configured key reference.
///
/// One data key is generated per write; the plaintext attribute value is
/// rendered as canonical wire JSON and sealed with AES-256-GCM, so any
/// attribute type can be encrypted and decodes back to its typed form.
pub struct EnvelopeCryptographer {
    keys: Arc<dyn KeyService>,
    key_ref: String,
    random: Arc<dyn RandomSource>,
}

impl EnvelopeCryptographer {
    pub fn new(
        keys: Arc<dyn KeyService>,
        key_ref: impl Into<String>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            keys,
            key_ref: key_ref.into(),
            random,
        }
    }

    /// The AAD bytes for one attribute.
    pub fn aad(attribute: &str) -> Vec<u8> {
        format!("{ENCRYPTION_AAD_CONTEXT}|attr={attribute}").into_bytes()
    }

    /// Seal a plaintext attribute value into its stored envelope.
    pub async fn encrypt_attribute(
        &self,
        model: &str,
        attribute: &str,
        plaintext: &AttributeValue,
    ) -> TheoryResult<AttributeValue> {
        let not_configured = || TheoryError::EncryptionNotConfigured {
            model: model.to_string(),
        };

        let data_key = self
            .keys
            .generate_data_key(&self.key_ref)
            .await
            .map_err(|_| not_configured())?;
        if data_key.plaintext.len() != DATA_KEY_LEN {
            return Err(not_configured());
        }
        let cipher =
            Aes256Gcm::new_from_slice(&data_key.plaintext).map_err(|_| not_configured())?;

        let mut nonce = [0u8; NONCE_LEN];
        self.random.fill(&mut nonce);

        let body = plaintext_bytes(attribute, plaintext)?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &body,
                    aad: &Self::aad(attribute),
                },
            )
            .map_err(|_| TheoryError::InvalidEncryptedEnvelope {
                attribute: attribute.to_string(),
            })?;

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            edk: data_key.encrypted,
            nonce: Bytes::copy_from_slice(&nonce),
            ct: Bytes::from(sealed),
        }
        .to_attribute())
    }

    /// Open a stored envelope back into the plaintext attribute value.
    pub async fn decrypt_attribute(
        &self,
        attribute: &str,
        stored: &AttributeValue,
    ) -> TheoryResult<AttributeValue> {
        let malformed = || TheoryError::InvalidEncryptedEnvelope {
            attribute: attribute.to_string(),
        };

        let envelope = Envelope::from_attribute(attribute, stored)?;
        if envelope.version != ENVELOPE_VERSION || envelope.nonce.len() != NONCE_LEN {
            return Err(malformed());
        }

        let data_key = self
            .keys
            .decrypt_data_key(&self.key_ref, &envelope.edk)
            .await
            .map_err(|_| malformed())?;
        let cipher = Aes256Gcm::new_from_slice(&data_key).map_err(|_| malformed())?;

        let body = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ct,
                    aad: &Self::aad(attribute),
                },
            )
            .map_err(|_| malformed())?;

        serde_json::from_slice(&body).map_err(|_| malformed())
    }
}

/// Canonical plaintext rendering: the attribute value's wire JSON with
/// sorted keys, so sealing is deterministic given key and nonce.
fn plaintext_bytes(attribute: &str, value: &AttributeValue) -> TheoryResult<Vec<u8>> {
    let json = serde_json::to_value(value).map_err(|_| TheoryError::InvalidEncryptedEnvelope {
        attribute: attribute.to_string(),
    })?;
    Ok(canonical_json(&json).into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyservice::DataKey;
    use async_trait::async_trait;

    /// Wraps data keys by XOR with a fixed pad; deterministic and
    /// reversible without key-service state.
    struct StubKeys;

    const PAD: u8 = 0x5a;

    #[async_trait]
    impl KeyService for StubKeys {
        async fn generate_data_key(&self, _key_ref: &str) -> TheoryResult<DataKey> {
            let plaintext = vec![7u8; 32];
            let encrypted: Vec<u8> = plaintext.iter().map(|b| b ^ PAD).collect();
            Ok(DataKey {
                plaintext: Bytes::from(plaintext),
                encrypted: Bytes::from(encrypted),
            })
        }

        async fn decrypt_data_key(&self, _key_ref: &str, encrypted: &[u8]) -> TheoryResult<Bytes> {
            Ok(Bytes::from(
                encrypted.iter().map(|b| b ^ PAD).collect::<Vec<u8>>(),
            ))
        }
    }

    struct FixedRandom;

    impl RandomSource for FixedRandom {
        fn fill(&self, buf: &mut [u8]) {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = i as u8;
            }
        }
    }

    fn cryptographer() -> EnvelopeCryptographer {
        EnvelopeCryptographer::new(
            Arc::new(StubKeys),
            "arn:aws:kms:test",
            Arc::new(FixedRandom),
        )
    }

    #[tokio::test]
    async fn seal_and_open_round_trips_typed_values() {
        let crypto = cryptographer();
        for plaintext in [
            AttributeValue::s("card-1234"),
            AttributeValue::n(42),
            AttributeValue::Bool(true),
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
        ] {
            let sealed = crypto
                .encrypt_attribute("Payment", "secret", &plaintext)
                .await
                .unwrap();
            assert!(sealed.as_m().is_some());
            let opened = crypto.decrypt_attribute("secret", &sealed).await.unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[tokio::test]
    async fn ciphertext_is_bound_to_its_attribute() {
        let crypto = cryptographer();
        let sealed = crypto
            .encrypt_attribute("Payment", "secret", &AttributeValue::s("x"))
            .await
            .unwrap();
        let err = crypto.decrypt_attribute("secret2", &sealed).await.unwrap_err();
        assert!(matches!(err, TheoryError::InvalidEncryptedEnvelope { .. }));
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_authentication() {
        let crypto = cryptographer();
        let sealed = crypto
            .encrypt_attribute("Payment", "secret", &AttributeValue::s("x"))
            .await
            .unwrap();
        let tampered = match sealed {
            AttributeValue::M(mut map) => {
                let ct = map.get("ct").and_then(AttributeValue::as_b).unwrap();
                let mut bytes = ct.to_vec();
                bytes[0] ^= 1;
                map.insert("ct".into(), AttributeValue::B(Bytes::from(bytes)));
                AttributeValue::M(map)
            }
            other => other,
        };
        assert!(crypto.decrypt_attribute("secret", &tampered).await.is_err());
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let crypto = cryptographer();
        let sealed = crypto
            .encrypt_attribute("Payment", "secret", &AttributeValue::s("x"))
            .await
            .unwrap();
        let bumped = match sealed {
            AttributeValue::M(mut map) => {
                map.insert("v".into(), AttributeValue::n(2));
                AttributeValue::M(map)
            }
            other => other,
        };
        assert!(crypto.decrypt_attribute("secret", &bumped).await.is_err());
    }

    #[tokio::test]
    async fn error_text_never_leaks_payloads() {
        let crypto = cryptographer();
        let sealed = crypto
            .encrypt_attribute("Payment", "secret", &AttributeValue::s("hunter2"))
            .await
            .unwrap();
        let err = crypto.decrypt_attribute("other", &sealed).await.unwrap_err();
        let text = err.to_string();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("other"));
    }
}
