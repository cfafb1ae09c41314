//! API Adapter contract (spec §4.2) and the Databento reference
//! implementation.

pub mod databento;

use crate::config::{JobConfig, RetryPolicyConfig};
use crate::error::IngestError;
use crate::models::FlatRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// One date-bounded sub-range of a job, produced by splitting
/// `[start_date, end_date]` into at most `date_chunk_interval_days` pieces
/// (spec §4.2 `IterateChunks`).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: Vec<String>,
    pub schema: String,
    pub stype_in: String,
}

/// Any adapter implementation must provide this capability set (spec §4.2).
#[async_trait]
pub trait ApiAdapter: Send + Sync {
    async fn configure(&mut self, job: &JobConfig) -> Result<(), IngestError>;

    /// Splits the job's date range into sub-ranges of at most
    /// `date_chunk_interval_days`.
    fn iterate_chunks(&self, job: &JobConfig) -> Result<Vec<Chunk>, IngestError>;

    /// Fetches one chunk's records as internal flat dicts, applying field
    /// renames and symbol repair (spec §4.2 `ToDict`, §4.6).
    async fn fetch_chunk(&self, chunk: &Chunk) -> Result<Vec<FlatRecord>, IngestError>;

    async fn close(&mut self) -> Result<(), IngestError>;
}

/// Exponential backoff with jitter, shared by every adapter implementation
/// (spec §4.2.1; grounded on the teacher's
/// `scrapers/polymarket_api.rs::execute_with_retry`, generalized from a
/// fixed 3-attempt loop into a configurable policy object).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retry_on_status_codes: Vec<u16>,
    pub respect_retry_after: bool,
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(cfg: &RetryPolicyConfig) -> Self {
        RetryPolicy {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs_f64(cfg.base_delay),
            max_delay: Duration::from_secs_f64(cfg.max_delay),
            backoff_multiplier: cfg.backoff_multiplier,
            retry_on_status_codes: cfg.retry_on_status_codes.clone(),
            respect_retry_after: cfg.respect_retry_after,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            retry_on_status_codes: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_on_status_codes.contains(&status)
    }

    /// Delay before the next attempt, with +/-20% jitter so a retry storm
    /// doesn't re-synchronize on the vendor.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if self.respect_retry_after {
            if let Some(d) = retry_after {
                return d;
            }
        }
        let raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    /// Runs `f` up to `max_retries + 1` times, retrying on a `Retryable`
    /// classification from the callback's result.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        mut f: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AdapterAttemptError>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            let started = std::time::Instant::now();
            let outcome = f().await;
            metrics::histogram!(crate::metrics::ADAPTER_REQUEST_SECONDS, "operation" => operation_name.to_string())
                .record(started.elapsed().as_secs_f64());
            match outcome {
                Ok(value) => return Ok(value),
                Err(AdapterAttemptError::Retryable { status, retry_after, message }) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        status,
                        "{message}, retrying"
                    );
                    last_err = Some(IngestError::VendorHttp {
                        status: status.unwrap_or(0),
                        body: message,
                    });
                    if attempt < self.max_retries {
                        metrics::counter!(crate::metrics::CHUNKS_RETRIED).increment(1);
                        tokio::time::sleep(self.delay_for_attempt(attempt, retry_after)).await;
                    }
                }
                Err(AdapterAttemptError::Fatal(err)) => return Err(err),
            }
        }
        debug!(operation = operation_name, "retries exhausted");
        Err(last_err.unwrap_or(IngestError::Config("retries exhausted".to_string())))
    }
}

/// Distinguishes a transient failure (worth retrying) from one that should
/// propagate immediately (spec §4.2.1: "4xx other than 408/429 is
/// non-retryable").
pub enum AdapterAttemptError {
    Retryable {
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },
    Fatal(IngestError),
}
