use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Vendor-published statistic (open interest, settlement, session high/low,
/// etc. — spec §3.1 Statistics, grounded on databento-dbn's `StatMsg`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub ts_event: i64,
    pub ts_recv: i64,
    pub ts_ref: Option<i64>,
    pub publisher_id: i32,
    pub instrument_id: i64,
    pub symbol: String,
    pub stat_type: i32,
    /// Renamed from the vendor's `price` field during mapping (spec §4.2.1).
    pub stat_value: Option<Decimal>,
    pub quantity: Option<i64>,
    pub sequence: Option<i64>,
    pub ts_in_delta: Option<i64>,
    pub channel_id: Option<i32>,
    pub update_action: i32,
    pub stat_flags: Option<i32>,
}

impl StatisticsRecord {
    /// Spec §3.2 Statistics invariants. Uniqueness of
    /// `(instrument_id, stat_type, ts_event)` is enforced at the loader's
    /// conflict key, not here — a single row has no way to see its peers.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(v) = self.stat_value {
            if v < Decimal::ZERO {
                return Err(format!("stat_value {} must be >= 0 when present", v));
            }
        }
        if let Some(q) = self.quantity {
            if q < 0 {
                return Err(format!("quantity {} must be >= 0 when present", q));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StatisticsRecord {
        StatisticsRecord {
            ts_event: 1,
            ts_recv: 1,
            ts_ref: None,
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            stat_type: 1,
            stat_value: Some(Decimal::new(100, 0)),
            quantity: Some(5),
            sequence: Some(1),
            ts_in_delta: None,
            channel_id: Some(0),
            update_action: 1,
            stat_flags: None,
        }
    }

    #[test]
    fn accepts_well_formed_statistic() {
        assert!(base().check_invariants().is_ok());
    }

    #[test]
    fn rejects_negative_stat_value() {
        let mut r = base();
        r.stat_value = Some(Decimal::new(-1, 0));
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn rejects_negative_quantity() {
        let mut r = base();
        r.quantity = Some(-1);
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn allows_absent_optional_fields() {
        let mut r = base();
        r.stat_value = None;
        r.quantity = None;
        assert!(r.check_invariants().is_ok());
    }
}
