use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument reference data (spec §3.1 Definition). Scalar fields cover the
/// subset the validator, loader and query builder actually inspect, modeled
/// on databento-dbn's `InstrumentDefMsg` plus the spread `leg_*` fields
/// carried in its `compat` module. Every other vendor column rides along in
/// `extra` untouched — the validator is explicitly non-strict about unknown
/// definition fields (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub ts_event: i64,
    pub ts_recv: i64,
    pub publisher_id: i32,
    pub instrument_id: i64,
    pub raw_instrument_id: Option<i64>,
    pub symbol: String,
    pub raw_symbol: Option<String>,
    pub security_update_action: char,
    pub instrument_class: String,
    pub min_price_increment: Decimal,
    pub display_factor: Decimal,
    pub expiration: i64,
    pub activation: i64,
    pub high_limit_price: Option<Decimal>,
    pub low_limit_price: Option<Decimal>,
    pub max_price_variation: Option<Decimal>,
    pub trading_reference_price: Option<Decimal>,
    pub unit_of_measure_qty: Option<Decimal>,
    pub min_price_increment_amount: Option<Decimal>,
    pub price_ratio: Option<Decimal>,
    pub strike_price: Option<Decimal>,
    pub strike_price_currency: Option<String>,
    pub inst_attrib_value: Option<i64>,
    pub underlying_id: Option<i64>,
    pub market_depth_implied: Option<i32>,
    pub market_depth: Option<i32>,
    pub market_segment_id: Option<i32>,
    pub max_trade_vol: Option<i64>,
    pub min_lot_size: Option<i64>,
    pub min_lot_size_block: Option<i64>,
    pub min_lot_size_round_lot: Option<i64>,
    pub min_trade_vol: Option<i64>,
    pub contract_multiplier: Option<i32>,
    pub contract_multiplier_unit: Option<i32>,
    pub decay_quantity: Option<i32>,
    pub decay_start_date: Option<i64>,
    pub original_contract_size: Option<i64>,
    pub trading_reference_date: Option<i64>,
    pub appl_id: Option<i32>,
    pub maturity_year: Option<i32>,
    pub maturity_month: Option<i32>,
    pub maturity_day: Option<i32>,
    pub maturity_week: Option<i32>,
    pub channel_id: i32,
    pub currency: Option<String>,
    pub settl_currency: Option<String>,
    pub secsubtype: Option<String>,
    pub group: Option<String>,
    pub exchange: Option<String>,
    pub asset: Option<String>,
    pub cfi: Option<String>,
    pub security_type: Option<String>,
    pub unit_of_measure: Option<String>,
    pub underlying: Option<String>,
    pub match_algorithm: Option<char>,
    pub md_security_trading_status: Option<i32>,
    pub main_fraction: Option<i32>,
    pub sub_fraction: Option<i32>,
    pub price_display_format: Option<i32>,
    pub settl_price_type: Option<i32>,
    pub underlying_product: Option<i32>,
    pub user_defined_instrument: Option<char>,
    pub flow_schedule_type: Option<i32>,
    pub tick_rule: Option<i32>,
    /// Spread leg fields (databento-dbn `compat.rs`); `leg_count == 0` for
    /// a plain (non-spread) instrument.
    pub leg_count: i32,
    pub leg_index: Option<i32>,
    pub leg_instrument_id: Option<i64>,
    pub leg_price: Option<Decimal>,
    pub leg_side: Option<char>,
    pub leg_ratio_price_numerator: Option<i32>,
    pub leg_ratio_price_denominator: Option<i32>,
    pub leg_ratio_qty_numerator: Option<i32>,
    pub leg_ratio_qty_denominator: Option<i32>,
    pub leg_underlying_id: Option<i64>,
    /// Vendor columns not promoted to a named field above.
    pub extra: serde_json::Value,
}

impl DefinitionRecord {
    /// Spec §3.2 Definition invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.activation > self.expiration {
            return Err(format!(
                "activation {} must be <= expiration {}",
                self.activation, self.expiration
            ));
        }
        if let (Some(hi), Some(lo)) = (self.high_limit_price, self.low_limit_price) {
            if hi < lo {
                return Err(format!(
                    "high_limit_price {} must be >= low_limit_price {}",
                    hi, lo
                ));
            }
        }
        if self.min_price_increment <= Decimal::ZERO {
            return Err(format!(
                "min_price_increment {} must be > 0",
                self.min_price_increment
            ));
        }
        match (self.leg_count, self.leg_index) {
            (0, None) => {}
            (n, Some(_)) if n > 0 => {}
            (0, Some(idx)) => {
                return Err(format!(
                    "leg_count is 0 but leg_index is set to {idx}"
                ))
            }
            (n, None) => {
                return Err(format!("leg_count is {n} but leg_index is unset"))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DefinitionRecord {
        DefinitionRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 1,
            raw_instrument_id: None,
            symbol: "ES.FUT".to_string(),
            raw_symbol: None,
            security_update_action: 'A',
            instrument_class: "FUT".to_string(),
            min_price_increment: Decimal::new(25, 2),
            display_factor: Decimal::new(1, 0),
            expiration: 1_000_000,
            activation: 500_000,
            high_limit_price: Some(Decimal::new(500000, 2)),
            low_limit_price: Some(Decimal::new(400000, 2)),
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
            currency: Some("USD".to_string()),
            settl_currency: None,
            secsubtype: None,
            group: None,
            exchange: Some("GLBX".to_string()),
            asset: Some("ES".to_string()),
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
            extra: serde_json::Value::Null,
        }
    }

    #[test]
    fn accepts_well_formed_definition() {
        assert!(base().check_invariants().is_ok());
    }

    #[test]
    fn rejects_activation_after_expiration() {
        let mut r = base();
        r.activation = r.expiration + 1;
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn rejects_high_limit_below_low_limit() {
        let mut r = base();
        r.high_limit_price = Some(Decimal::new(100, 2));
        r.low_limit_price = Some(Decimal::new(200, 2));
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn rejects_non_positive_min_price_increment() {
        let mut r = base();
        r.min_price_increment = Decimal::ZERO;
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn leg_count_and_leg_index_must_agree() {
        let mut r = base();
        r.leg_index = Some(0);
        assert!(r.check_invariants().is_err(), "leg_count=0 with leg_index set");

        r.leg_count = 2;
        assert!(r.check_invariants().is_ok());

        r.leg_index = None;
        assert!(r.check_invariants().is_err(), "leg_count>0 with no leg_index");
    }
}
