use super::{check_event_time, check_symbol_format, Diagnostic, ValidationOutcome};
use crate::models::OhlcvRecord;

pub fn validate(r: &OhlcvRecord, now_micros: i64) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    if let Err(reason) = r.check_invariants() {
        out.diagnostics.push(Diagnostic::error("ohlcv", reason));
    }
    if let Some(d) = check_event_time("ts_event", r.ts_event, now_micros) {
        out.diagnostics.push(d);
    }
    if let Some(d) = check_symbol_format(&r.symbol) {
        out.diagnostics.push(d);
    }
    if let Some(tc) = r.trade_count {
        if tc < 0 {
            out.diagnostics.push(Diagnostic::error(
                "trade_count",
                format!("trade_count {tc} must be >= 0 when present"),
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Granularity;
    use rust_decimal::Decimal;

    fn bar() -> OhlcvRecord {
        OhlcvRecord {
            ts_event: 500,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            open_price: Decimal::new(100, 0),
            high_price: Decimal::new(110, 0),
            low_price: Decimal::new(95, 0),
            close_price: Decimal::new(105, 0),
            volume: 10,
            trade_count: Some(3),
            vwap: None,
            granularity: Granularity::OneDay,
            data_source: "databento".to_string(),
        }
    }

    #[test]
    fn well_formed_bar_has_no_errors() {
        assert!(!validate(&bar(), 1_000).has_errors());
    }

    #[test]
    fn ohlc_invariant_violation_is_an_error() {
        let mut r = bar();
        r.high_price = Decimal::new(90, 0);
        assert!(validate(&r, 1_000).has_errors());
    }

    #[test]
    fn negative_trade_count_is_an_error() {
        let mut r = bar();
        r.trade_count = Some(-1);
        assert!(validate(&r, 1_000).has_errors());
    }
}
