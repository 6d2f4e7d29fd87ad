//! Configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when `ConsistentRead` is requested on a global secondary
/// index, which the store cannot serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GsiConsistentRead {
    /// Drop the flag and log a warning (default)
    #[default]
    Drop,
    /// Fail the request
    Reject,
}

/// Batch and transaction coordinator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Items per request chunk; clamped to the store's per-request limit
    pub chunk_size: Option<usize>,
    /// Upper bound on chunks in flight at once
    pub max_concurrency: usize,
    /// Attempts per item before unprocessed remainders are surfaced
    pub max_attempts: u32,
    /// Backoff base delay (first retry)
    pub base_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            max_concurrency: 4,
            max_attempts: 10,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl BatchConfig {
    /// The sum of worst-case backoff waits: `sum min(cap, base * 2^i)` over
    /// attempts. Full jitter draws uniformly below each term, so this bounds
    /// total sleep time.
    pub fn max_total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 0..self.max_attempts {
            total += self.backoff_ceiling(attempt);
        }
        total
    }

    /// The jitter ceiling for one retry attempt (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_backoff)
    }
}

/// Transport safety defaults for the store client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Session configuration for a TheoryDB entry point.
///
/// `clock` and `random` sources are injected on the session builder rather
/// than here; everything in this struct is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheoryConfig {
    /// Store region
    pub region: Option<String>,
    /// Store endpoint override (local testing)
    pub endpoint: Option<String>,
    /// Named credentials profile override
    pub credentials_profile: Option<String>,
    /// Key reference enabling envelope encryption; absence fails closed for
    /// models with encrypted attributes
    pub kms_key_arn: Option<String>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Default read consistency for base-table reads
    #[serde(default)]
    pub consistent_read: bool,
    #[serde(default)]
    pub gsi_consistent_read: GsiConsistentRead,
    /// Derive a cancellation deadline from the execution environment
    #[serde(default)]
    pub lambda_mode: bool,
    /// Safety buffer subtracted from the execution deadline in lambda mode
    #[serde(default = "default_lambda_safety_buffer")]
    pub lambda_safety_buffer: Duration,
}

fn default_lambda_safety_buffer() -> Duration {
    Duration::from_secs(1)
}

impl Default for TheoryConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            credentials_profile: None,
            kms_key_arn: None,
            batch: BatchConfig::default(),
            http: HttpConfig::default(),
            consistent_read: false,
            gsi_consistent_read: GsiConsistentRead::default(),
            lambda_mode: false,
            lambda_safety_buffer: default_lambda_safety_buffer(),
        }
    }
}

impl TheoryConfig {
    /// Configuration from environment variables.
    ///
    /// Honors `STORE_ENDPOINT` / `DYNAMODB_ENDPOINT` and `AWS_REGION` /
    /// `REGION`. No library-specific variable defines security behavior.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("STORE_ENDPOINT")
            .or_else(|_| std::env::var("DYNAMODB_ENDPOINT"))
            .ok();
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("REGION"))
            .ok();
        Self {
            region,
            endpoint,
            ..Self::default()
        }
    }

    /// Set the key reference enabling envelope encryption.
    pub fn with_kms_key_arn(mut self, arn: impl Into<String>) -> Self {
        self.kms_key_arn = Some(arn.into());
        self
    }

    /// Set the store endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the store region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}
