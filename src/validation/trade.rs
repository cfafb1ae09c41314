use super::{check_event_time, check_symbol_format, Diagnostic, Severity, ValidationOutcome};
use crate::models::TradeRecord;

pub fn validate(r: &TradeRecord, now_micros: i64) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    if let Err(reason) = r.check_invariants() {
        out.diagnostics.push(Diagnostic::error("trade", reason));
    }
    if let Some(d) = check_event_time("ts_event", r.ts_event, now_micros) {
        out.diagnostics.push(d);
    }
    if let Some(d) = check_symbol_format(&r.symbol) {
        out.diagnostics.push(d);
    }
    if r.ts_recv < r.ts_event {
        out.diagnostics.push(Diagnostic::warning(
            "ts_recv",
            format!("ts_recv {} precedes ts_event {}", r.ts_recv, r.ts_event),
        ));
    }
    if r.action != 'T' {
        out.diagnostics.push(Diagnostic::info(
            "action",
            format!("unexpected action code '{}' for a trade record", r.action),
        ));
    }
    if let Some(raw) = r.raw_side {
        out.diagnostics.push(Diagnostic::warning(
            "side",
            format!("unrecognized side code '{raw}' (expected A, B, or N); coerced to None"),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal::Decimal;

    fn trade() -> TradeRecord {
        TradeRecord {
            ts_event: 500,
            ts_recv: 600,
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            price: Decimal::new(450050, 2),
            size: 1,
            action: 'T',
            side: Side::Ask,
            flags: 0,
            depth: 0,
            sequence: None,
            ts_in_delta: None,
            is_spread: false,
            raw_side: None,
        }
    }

    #[test]
    fn well_formed_trade_has_no_errors() {
        assert!(!validate(&trade(), 1_000).has_errors());
    }

    #[test]
    fn zero_price_on_a_non_spread_is_an_error() {
        let mut r = trade();
        r.price = Decimal::ZERO;
        assert!(validate(&r, 1_000).has_errors());
    }

    #[test]
    fn ts_recv_before_ts_event_is_only_a_warning() {
        let mut r = trade();
        r.ts_recv = r.ts_event - 1;
        let outcome = validate(&r, 1_000);
        assert!(!outcome.has_errors());
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.field == "ts_recv"));
    }

    #[test]
    fn unrecognized_raw_side_is_a_warning_not_an_error() {
        let mut r = trade();
        r.side = Side::None;
        r.raw_side = Some('X');
        let outcome = validate(&r, 1_000);
        assert!(!outcome.has_errors());
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.field == "side"));
    }
}
