//! Key-service boundary.

use async_trait::async_trait;
use bytes::Bytes;
use theorydb_core::TheoryResult;

/// A data key pair: the plaintext used to seal one value and its wrapped
/// form stored in the envelope.
#[derive(Debug, Clone)]
pub struct DataKey {
    pub plaintext: Bytes,
    pub encrypted: Bytes,
}

/// The external key service (AES-256 data keys).
///
/// Implementations return store-facing errors only; the cryptographer maps
/// every failure to the fail-closed or envelope error of the enclosing
/// operation, so key-service detail never decides control flow upstream.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Obtain a fresh 256-bit data key under the given key reference.
    async fn generate_data_key(&self, key_ref: &str) -> TheoryResult<DataKey>;

    /// Unwrap an encrypted data key.
    async fn decrypt_data_key(&self, key_ref: &str, encrypted: &[u8]) -> TheoryResult<Bytes>;
}
