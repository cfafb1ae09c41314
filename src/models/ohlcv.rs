use super::Schema;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bar aggregation period (spec §3.1 `ohlcv-1s|1m|5m|15m|1h|1d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    OneSecond,
    OneMinute,
    FiveMinute,
    FifteenMinute,
    OneHour,
    OneDay,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::OneSecond => "1s",
            Granularity::OneMinute => "1m",
            Granularity::FiveMinute => "5m",
            Granularity::FifteenMinute => "15m",
            Granularity::OneHour => "1h",
            Granularity::OneDay => "1d",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "1s" => Granularity::OneSecond,
            "1m" => Granularity::OneMinute,
            "5m" => Granularity::FiveMinute,
            "15m" => Granularity::FifteenMinute,
            "1h" => Granularity::OneHour,
            "1d" => Granularity::OneDay,
            _ => return None,
        })
    }

    pub fn schema(&self) -> Schema {
        match self {
            Granularity::OneSecond => Schema::Ohlcv1S,
            Granularity::OneMinute => Schema::Ohlcv1M,
            Granularity::FiveMinute => Schema::Ohlcv5M,
            Granularity::FifteenMinute => Schema::Ohlcv15M,
            Granularity::OneHour => Schema::Ohlcv1H,
            Granularity::OneDay => Schema::Ohlcv1D,
        }
    }
}

/// Open/high/low/close/volume bar (spec §3.1 OHLCV).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub ts_event: i64, // UTC microseconds since epoch (spec §9 "single internal representation")
    pub instrument_id: i64,
    pub symbol: String,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: i64,
    pub trade_count: Option<i64>,
    pub vwap: Option<Decimal>,
    pub granularity: Granularity,
    pub data_source: String,
}

impl OhlcvRecord {
    /// Spec §3.2 OHLCV invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        let hi_bound = self.open_price.max(self.close_price).max(self.low_price);
        if self.high_price < hi_bound {
            return Err(format!(
                "high_price {} must be >= max(open,close,low) {}",
                self.high_price, hi_bound
            ));
        }
        let lo_bound = self.open_price.min(self.close_price).min(self.high_price);
        if self.low_price > lo_bound {
            return Err(format!(
                "low_price {} must be <= min(open,close,high) {}",
                self.low_price, lo_bound
            ));
        }
        if self.volume < 0 {
            return Err(format!("volume {} must be >= 0", self.volume));
        }
        if let Some(vwap) = self.vwap {
            if vwap < self.low_price || vwap > self.high_price {
                return Err(format!(
                    "vwap {} must lie within [low_price {}, high_price {}]",
                    vwap, self.low_price, self.high_price
                ));
            }
        }
        Ok(())
    }
}
