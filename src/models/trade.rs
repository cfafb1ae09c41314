use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggressing order side (spec §3.1 Trade, grounded on databento-dbn's
/// `TradeMsg::side`: `'A'|'B'|'N'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Ask,
    Bid,
    None,
}

impl Side {
    pub fn parse(raw: char) -> Option<Self> {
        Some(match raw.to_ascii_uppercase() {
            'A' => Side::Ask,
            'B' => Side::Bid,
            'N' => Side::None,
            _ => return None,
        })
    }

    pub fn as_char(&self) -> char {
        match self {
            Side::Ask => 'A',
            Side::Bid => 'B',
            Side::None => 'N',
        }
    }
}

/// A single print on the tape (spec §3.1 Trade).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts_event: i64,
    pub ts_recv: i64,
    pub publisher_id: i32,
    pub instrument_id: i64,
    pub symbol: String,
    pub price: Decimal,
    pub size: i64,
    pub action: char, // always 'T' for this schema
    pub side: Side,
    pub flags: i32,
    pub depth: i32,
    pub sequence: Option<i64>,
    pub ts_in_delta: Option<i64>,
    /// Spreads may carry a legitimately negative price; set by the rule
    /// engine from job/definition context, never guessed by the validator.
    pub is_spread: bool,
    /// The vendor `side` byte when it didn't parse into `{A,B,N}`, kept
    /// around (like `action`) so the validator can flag it instead of the
    /// coercion to `Side::None` happening silently (spec §3.2 `side ∈
    /// {A,B,N}`).
    pub raw_side: Option<char>,
}

impl TradeRecord {
    /// Spec §3.2 Trade invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.price <= Decimal::ZERO && !self.is_spread {
            return Err(format!(
                "price {} must be > 0 unless instrument is a spread",
                self.price
            ));
        }
        if self.size <= 0 {
            return Err(format!("size {} must be > 0", self.size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TradeRecord {
        TradeRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 42,
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
    fn side_round_trips_through_char() {
        for c in ['A', 'B', 'N'] {
            let side = Side::parse(c).unwrap();
            assert_eq!(side.as_char(), c);
        }
        assert!(Side::parse('X').is_none());
    }

    #[test]
    fn rejects_non_positive_price_unless_spread() {
        let mut r = base();
        r.price = Decimal::ZERO;
        assert!(r.check_invariants().is_err());

        r.is_spread = true;
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn rejects_non_positive_size() {
        let mut r = base();
        r.size = 0;
        assert!(r.check_invariants().is_err());
    }

    #[test]
    fn accepts_a_well_formed_trade() {
        assert!(base().check_invariants().is_ok());
    }
}
