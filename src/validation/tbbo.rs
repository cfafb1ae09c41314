use super::{check_event_time, check_symbol_format, Diagnostic, ValidationOutcome};
use crate::models::TbboRecord;

pub fn validate(r: &TbboRecord, now_micros: i64) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    if let Err(reason) = r.check_invariants() {
        out.diagnostics.push(Diagnostic::error("tbbo", reason));
    }
    if let Some(d) = check_event_time("ts_event", r.ts_event, now_micros) {
        out.diagnostics.push(d);
    }
    if let Some(d) = check_symbol_format(&r.symbol) {
        out.diagnostics.push(d);
    }

    out
}
