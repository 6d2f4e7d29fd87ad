//! Injectable randomness.

use rand::rngs::OsRng;
use rand::RngCore;

/// Source of nonce bytes. Injectable so tests can pin encryption output.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Operating-system randomness (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}
