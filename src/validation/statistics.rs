use super::{check_event_time, check_symbol_format, Diagnostic, ValidationOutcome};
use crate::models::StatisticsRecord;

pub fn validate(r: &StatisticsRecord, now_micros: i64) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    if let Err(reason) = r.check_invariants() {
        out.diagnostics.push(Diagnostic::error("statistics", reason));
    }
    if let Some(d) = check_event_time("ts_event", r.ts_event, now_micros) {
        out.diagnostics.push(d);
    }
    if let Some(d) = check_symbol_format(&r.symbol) {
        out.diagnostics.push(d);
    }
    if let Some(ts_ref) = r.ts_ref {
        if let Some(d) = check_event_time("ts_ref", ts_ref, now_micros) {
            out.diagnostics.push(d);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn stat() -> StatisticsRecord {
        StatisticsRecord {
            ts_event: 500,
            ts_recv: 500,
            ts_ref: Some(400),
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            stat_type: 1,
            stat_value: Some(Decimal::new(100, 0)),
            quantity: Some(1),
            sequence: Some(1),
            ts_in_delta: None,
            channel_id: Some(0),
            update_action: 1,
            stat_flags: None,
        }
    }

    #[test]
    fn well_formed_statistic_has_no_errors() {
        assert!(!validate(&stat(), 1_000).has_errors());
    }

    #[test]
    fn negative_stat_value_is_an_error() {
        let mut r = stat();
        r.stat_value = Some(Decimal::new(-1, 0));
        assert!(validate(&r, 1_000).has_errors());
    }

    #[test]
    fn future_ts_ref_is_only_a_warning() {
        let mut r = stat();
        r.ts_ref = Some(2_000);
        let outcome = validate(&r, 1_000);
        assert!(!outcome.has_errors());
    }
}
