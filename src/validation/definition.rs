use super::{check_event_time, check_symbol_format, Diagnostic, ValidationOutcome};
use crate::models::DefinitionRecord;

pub fn validate(r: &DefinitionRecord, now_micros: i64) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    if let Err(reason) = r.check_invariants() {
        out.diagnostics.push(Diagnostic::error("definition", reason));
    }
    if let Some(d) = check_event_time("ts_event", r.ts_event, now_micros) {
        out.diagnostics.push(d);
    }
    if let Some(d) = check_symbol_format(&r.symbol) {
        out.diagnostics.push(d);
    }
    // Unknown/extra vendor fields are never flagged: the validator is
    // explicitly non-strict about definition payloads (spec §4.4).
    if !r.extra.is_object() && !r.extra.is_null() {
        out.diagnostics.push(Diagnostic::info(
            "extra",
            "extra vendor fields were not a JSON object",
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn minimal() -> DefinitionRecord {
        DefinitionRecord {
            ts_event: 500,
            ts_recv: 500,
            publisher_id: 1,
            instrument_id: 1,
            raw_instrument_id: None,
            symbol: "ES.FUT".to_string(),
            raw_symbol: None,
            security_update_action: 'A',
            instrument_class: "FUT".to_string(),
            min_price_increment: Decimal::new(25, 2),
            display_factor: Decimal::new(1, 0),
            expiration: 1_000,
            activation: 100,
            high_limit_price: None,
            low_limit_price: None,
            max_price_variation: None,
            trading_reference_price: None,
            unit_of_measure_qty: None,
            min_price_increment_amount: None,
            price_ratio: None,
            strike_price: None,
            strike_price_currency: None,
            inst_attrib_value: None,
            underlying_id: None,
            market_depth_implied: None,
            market_depth: None,
            market_segment_id: None,
            max_trade_vol: None,
            min_lot_size: None,
            min_lot_size_block: None,
            min_lot_size_round_lot: None,
            min_trade_vol: None,
            contract_multiplier: None,
            contract_multiplier_unit: None,
            decay_quantity: None,
            decay_start_date: None,
            original_contract_size: None,
            trading_reference_date: None,
            appl_id: None,
            maturity_year: None,
            maturity_month: None,
            maturity_day: None,
            maturity_week: None,
            channel_id: 0,
            currency: None,
            settl_currency: None,
            secsubtype: None,
            group: None,
            exchange: None,
            asset: None,
            cfi: None,
            security_type: None,
            unit_of_measure: None,
            underlying: None,
            match_algorithm: None,
            md_security_trading_status: None,
            main_fraction: None,
            sub_fraction: None,
            price_display_format: None,
            settl_price_type: None,
            underlying_product: None,
            user_defined_instrument: None,
            flow_schedule_type: None,
            tick_rule: None,
            leg_count: 0,
            leg_index: None,
            leg_instrument_id: None,
            leg_price: None,
            leg_side: None,
            leg_ratio_price_numerator: None,
            leg_ratio_price_denominator: None,
            leg_ratio_qty_numerator: None,
            leg_ratio_qty_denominator: None,
            leg_underlying_id: None,
            extra: serde_json::json!({"vendor_field": 1}),
        }
    }

    #[test]
    fn well_formed_definition_has_no_errors() {
        assert!(!validate(&minimal(), 1_000).has_errors());
    }

    #[test]
    fn invariant_violation_is_an_error() {
        let mut r = minimal();
        r.activation = r.expiration + 1;
        assert!(validate(&r, 1_000).has_errors());
    }

    #[test]
    fn non_object_extra_is_only_an_info_diagnostic() {
        let mut r = minimal();
        r.extra = serde_json::Value::String("oops".to_string());
        let outcome = validate(&r, 1_000);
        assert!(!outcome.has_errors());
        assert!(outcome.diagnostics.iter().any(|d| d.field == "extra"));
    }
}
