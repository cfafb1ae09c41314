//! Post-mapping record validation (spec §4.4).
//!
//! Validation is deliberately non-strict: unknown fields are carried through
//! rather than rejected, timestamps are compared as naive UTC (no timezone
//! database lookups), and a record with only `Warning`/`Info` diagnostics is
//! still usable — only `Severity::Error` routes a row to quarantine.

pub mod definition;
pub mod ohlcv;
pub mod statistics;
pub mod tbbo;
pub mod trade;

use crate::models::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How serious a validation finding is (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single validation finding against one field of one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub field: String,
    pub reason: String,
}

impl Diagnostic {
    pub fn error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn warning(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn info(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Info,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of validating a single record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn merge(&mut self, other: ValidationOutcome) {
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Symbol-format check shared by every schema (spec §4.6): uppercase
/// alphanumerics plus `.`, `_`, `-`. Compiled once, like the teacher's
/// regex-backed scrapers.
pub static SYMBOL_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9._-]+$").expect("static regex is valid"));

pub fn check_symbol_format(symbol: &str) -> Option<Diagnostic> {
    if SYMBOL_FORMAT.is_match(symbol) {
        None
    } else {
        Some(Diagnostic::warning(
            "symbol",
            format!("symbol '{symbol}' does not match [A-Z0-9._-]+"),
        ))
    }
}

/// Naive-UTC timestamp sanity check shared by every schema: event time may
/// not be in the future relative to `now_micros`, and must be after the
/// Unix epoch (spec §4.4 "single internal representation, no tz lookups").
pub fn check_event_time(field: &str, ts_micros: i64, now_micros: i64) -> Option<Diagnostic> {
    if ts_micros < 0 {
        Some(Diagnostic::error(field, format!("{field} is before the Unix epoch")))
    } else if ts_micros > now_micros {
        Some(Diagnostic::warning(
            field,
            format!("{field} {ts_micros} is in the future (now={now_micros})"),
        ))
    } else {
        None
    }
}

/// A schema-specific validator: checks structural invariants plus the
/// cross-cutting symbol/timestamp rules, and reports every finding without
/// aborting on the first one.
pub trait Validator {
    fn validate(&self, record: &Record, now_micros: i64) -> ValidationOutcome;
}

/// Dispatches to the per-schema validator based on the record's variant.
pub struct RecordValidator;

impl Validator for RecordValidator {
    fn validate(&self, record: &Record, now_micros: i64) -> ValidationOutcome {
        match record {
            Record::Ohlcv(r) => ohlcv::validate(r, now_micros),
            Record::Trade(r) => trade::validate(r, now_micros),
            Record::Tbbo(r) => tbbo::validate(r, now_micros),
            Record::Statistics(r) => statistics::validate(r, now_micros),
            Record::Definition(r) => definition::validate(r, now_micros),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_format_accepts_uppercase_alnum_dot_dash_underscore() {
        assert!(check_symbol_format("ES.c.0").is_none());
        assert!(check_symbol_format("CL_FUT-1").is_none());
    }

    #[test]
    fn symbol_format_flags_lowercase_as_warning() {
        let d = check_symbol_format("es.c.0").expect("should flag");
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn event_time_rejects_before_epoch() {
        let d = check_event_time("ts_event", -1, 1_000).expect("should flag");
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn event_time_warns_on_future_timestamp() {
        let d = check_event_time("ts_event", 2_000, 1_000).expect("should flag");
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn event_time_accepts_past_timestamp() {
        assert!(check_event_time("ts_event", 500, 1_000).is_none());
    }

    #[test]
    fn severity_ordering_places_error_highest() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn outcome_has_errors_only_when_an_error_diagnostic_is_present() {
        let mut outcome = ValidationOutcome::default();
        assert!(!outcome.has_errors());
        outcome.diagnostics.push(Diagnostic::warning("f", "r"));
        assert!(!outcome.has_errors());
        outcome.diagnostics.push(Diagnostic::error("f", "r"));
        assert!(outcome.has_errors());
    }
}
