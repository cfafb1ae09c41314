//! Error taxonomy for the ingestion pipeline (spec §7).
//!
//! Row-level and chunk-level errors are absorbed and counted by their caller;
//! only `ConfigError`, `AuthError` and `SymbologyError` are meant to abort a
//! job outright. `anyhow` is still used at the binary/glue layer for ad-hoc
//! context; this enum exists so the orchestrator can match on error kind
//! instead of inspecting strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vendor returned HTTP {status}: {body}")]
    VendorHttp { status: u16, body: String },

    #[error("invalid symbol/stype_in combination: {0}")]
    Symbology(String),

    #[error("mapping error on field '{field}': {reason}")]
    Mapping { field: String, reason: String },

    #[error("validation error ({severity:?}) on field '{field}': {reason}")]
    Validation {
        severity: crate::validation::Severity,
        field: String,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("symbol resolution error: {0}")]
    SymbolResolution(String),

    #[error("job cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether this error should abort the whole job (§7 propagation policy).
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            IngestError::Config(_) | IngestError::Auth(_) | IngestError::Symbology(_)
        )
    }

    /// VendorHttpError classification per §4.2.1: transient status codes are retryable.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504 | 408)
    }
}


/// CLI/user-visible exit codes (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    UserError = 1,
    ConfigError = 2,
    PartialSuccess = 3,
    FatalPipelineError = 4,
}
