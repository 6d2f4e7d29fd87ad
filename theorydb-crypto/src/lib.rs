//! TheoryDB Crypto - Envelope Encryption
//!
//! Attributes marked `encrypted` are stored as a typed envelope: a fresh
//! data key per write, wrapped by the key service, sealing the plaintext
//! value with AES-256-GCM. The attribute name is bound into the AEAD's
//! additional authenticated data, so a ciphertext moved to another
//! attribute fails authentication instead of decrypting in the wrong
//! place. Key material never appears in error text.

mod cryptographer;
mod envelope;
mod keyservice;
mod kms;
mod random;

pub use cryptographer::{EnvelopeCryptographer, ENCRYPTION_AAD_CONTEXT};
pub use envelope::{Envelope, ENVELOPE_VERSION};
pub use keyservice::{DataKey, KeyService};
pub use kms::KmsKeyService;
pub use random::{OsRandom, RandomSource};
