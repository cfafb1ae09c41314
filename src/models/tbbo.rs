use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-of-book bid/offer quote (spec §3.1 TBBO; field names follow
/// databento-dbn's `Mbp1Msg`/`BidAskPair` post `bid_px_00`->`bid_px` rename,
/// spec §4.2.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TbboRecord {
    pub ts_event: i64,
    pub ts_recv: i64,
    pub publisher_id: i32,
    pub instrument_id: i64,
    pub symbol: String,
    pub bid_px: Option<Decimal>,
    pub ask_px: Option<Decimal>,
    pub bid_sz: Option<i64>,
    pub ask_sz: Option<i64>,
    pub bid_ct: Option<i64>,
    pub ask_ct: Option<i64>,
    pub sequence: Option<i64>,
    pub flags: Option<i32>,
    /// Set by the rule engine when a "crossed book" flag is present in the
    /// source record; relaxes the `bid_px <= ask_px` invariant (spec §3.2).
    pub crossed: bool,
}

impl TbboRecord {
    /// Spec §3.2 TBBO invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.bid_px.is_none() && self.ask_px.is_none() {
            return Err("at least one of bid_px/ask_px must be present".to_string());
        }
        if let (Some(bid), Some(ask)) = (self.bid_px, self.ask_px) {
            if bid > ask && !self.crossed {
                return Err(format!(
                    "bid_px {} must be <= ask_px {} unless marked crossed",
                    bid, ask
                ));
            }
        }
        for (name, v) in [
            ("bid_sz", self.bid_sz),
            ("ask_sz", self.ask_sz),
            ("bid_ct", self.bid_ct),
            ("ask_ct", self.ask_ct),
        ] {
            if let Some(v) = v {
                if v < 0 {
                    return Err(format!("{name} {v} must be >= 0 when present"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TbboRecord {
        TbboRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            bid_px: Some(Decimal::new(449950, 2)),
            ask_px: Some(Decimal::new(450050, 2)),
            bid_sz: Some(10),
            ask_sz: Some(5),
            bid_ct: None,
            ask_ct: None,
            sequence: None,
            flags: None,
            crossed: false,
        }
    }

    #[test]
    fn rejects_both_sides_missing() {
        let mut r = base();
        r.bid_px = None;
        r.ask_px = None;
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn allows_one_side_missing() {
        let mut r = base();
        r.bid_px = None;
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn rejects_crossed_book_unless_flagged() {
        let mut r = base();
        r.bid_px = Some(Decimal::new(450100, 2));
        assert!(r.check_invariants().is_err());

        r.crossed = true;
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn rejects_negative_sizes_and_counts() {
        let mut r = base();
        r.bid_sz = Some(-1);
        assert!(r.check_invariants().is_err());
    }
}
