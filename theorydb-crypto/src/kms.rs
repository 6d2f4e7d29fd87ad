//! AWS KMS key service.

use crate::keyservice::{DataKey, KeyService};
use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client;
use bytes::Bytes;
use theorydb_core::{TheoryError, TheoryResult};

/// Key service backed by AWS KMS `GenerateDataKey` / `Decrypt`.
#[derive(Debug, Clone)]
pub struct KmsKeyService {
    client: Client,
}

impl KmsKeyService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn service_error(message: String) -> TheoryError {
    // The cryptographer replaces this with the enclosing operation's
    // fail-closed or envelope error; the message is for logs only and
    // carries no key material.
    TheoryError::InternalStoreError {
        code: Some("KMS".into()),
        message,
    }
}

#[async_trait]
impl KeyService for KmsKeyService {
    async fn generate_data_key(&self, key_ref: &str) -> TheoryResult<DataKey> {
        let out = self
            .client
            .generate_data_key()
            .key_id(key_ref)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| service_error(e.to_string()))?;
        let plaintext = out
            .plaintext()
            .ok_or_else(|| service_error("response carries no plaintext key".into()))?;
        let encrypted = out
            .ciphertext_blob()
            .ok_or_else(|| service_error("response carries no encrypted key".into()))?;
        Ok(DataKey {
            plaintext: Bytes::copy_from_slice(plaintext.as_ref()),
            encrypted: Bytes::copy_from_slice(encrypted.as_ref()),
        })
    }

    async fn decrypt_data_key(&self, key_ref: &str, encrypted: &[u8]) -> TheoryResult<Bytes> {
        let out = self
            .client
            .decrypt()
            .key_id(key_ref)
            .ciphertext_blob(Blob::new(encrypted))
            .send()
            .await
            .map_err(|e| service_error(e.to_string()))?;
        let plaintext = out
            .plaintext()
            .ok_or_else(|| service_error("response carries no plaintext key".into()))?;
        Ok(Bytes::copy_from_slice(plaintext.as_ref()))
    }
}
