//! Typed per-schema record definitions (spec §3).
//!
//! The adapter boundary deals in loosely-typed "flat dicts" (`FlatRecord`)
//! because vendor payloads arrive with ragged, vendor-specific field sets.
//! The rule engine and validators turn a `FlatRecord` into a `Record`, the
//! tagged union across the five schema kinds — after that point, loaders
//! never see anything but strongly-typed rows (spec §9, "tagged-union record
//! type... not opaque maps").

pub mod definition;
pub mod ohlcv;
pub mod statistics;
pub mod tbbo;
pub mod trade;

pub use definition::DefinitionRecord;
pub use ohlcv::{Granularity, OhlcvRecord};
pub use statistics::StatisticsRecord;
pub use tbbo::TbboRecord;
pub use trade::{Side, TradeRecord};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of record kinds the pipeline understands (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Schema {
    Ohlcv1S,
    Ohlcv1M,
    Ohlcv5M,
    Ohlcv15M,
    Ohlcv1H,
    Ohlcv1D,
    Trades,
    Tbbo,
    Statistics,
    Definition,
}

impl Schema {
    /// Normalizes schema aliases the way the orchestrator does at job
    /// ingestion (spec §4.1: `"ohlcv"` -> `"ohlcv-1d"`, `"definitions"` ->
    /// `"definition"`).
    pub fn parse_alias(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "ohlcv" | "ohlcv-1d" | "ohlcv1d" => Schema::Ohlcv1D,
            "ohlcv-1s" | "ohlcv1s" => Schema::Ohlcv1S,
            "ohlcv-1m" | "ohlcv1m" => Schema::Ohlcv1M,
            "ohlcv-5m" | "ohlcv5m" => Schema::Ohlcv5M,
            "ohlcv-15m" | "ohlcv15m" => Schema::Ohlcv15M,
            "ohlcv-1h" | "ohlcv1h" => Schema::Ohlcv1H,
            "trades" | "trade" => Schema::Trades,
            "tbbo" => Schema::Tbbo,
            "statistics" | "stats" => Schema::Statistics,
            "definitions" | "definition" => Schema::Definition,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Ohlcv1S => "ohlcv-1s",
            Schema::Ohlcv1M => "ohlcv-1m",
            Schema::Ohlcv5M => "ohlcv-5m",
            Schema::Ohlcv15M => "ohlcv-15m",
            Schema::Ohlcv1H => "ohlcv-1h",
            Schema::Ohlcv1D => "ohlcv-1d",
            Schema::Trades => "trades",
            Schema::Tbbo => "tbbo",
            Schema::Statistics => "statistics",
            Schema::Definition => "definition",
        }
    }

    pub fn granularity(&self) -> Option<Granularity> {
        match self {
            Schema::Ohlcv1S => Some(Granularity::OneSecond),
            Schema::Ohlcv1M => Some(Granularity::OneMinute),
            Schema::Ohlcv5M => Some(Granularity::FiveMinute),
            Schema::Ohlcv15M => Some(Granularity::FifteenMinute),
            Schema::Ohlcv1H => Some(Granularity::OneHour),
            Schema::Ohlcv1D => Some(Granularity::OneDay),
            _ => None,
        }
    }

    /// Default chunking window in days, per adapter §4.2.1.
    pub fn default_chunk_interval_days(&self) -> i64 {
        match self {
            Schema::Trades | Schema::Tbbo => 1,
            Schema::Ohlcv1S => 7,
            Schema::Ohlcv1M | Schema::Ohlcv5M | Schema::Ohlcv15M => 30,
            Schema::Ohlcv1H | Schema::Ohlcv1D => 90,
            Schema::Statistics => 30,
            Schema::Definition => 365,
        }
    }

    /// Target batch size for the loader of this schema (spec §4.5).
    pub fn batch_size(&self) -> usize {
        match self {
            Schema::Ohlcv1S
            | Schema::Ohlcv1M
            | Schema::Ohlcv5M
            | Schema::Ohlcv15M
            | Schema::Ohlcv1H
            | Schema::Ohlcv1D => 5_000,
            Schema::Trades => 10_000,
            Schema::Tbbo => 15_000,
            Schema::Statistics => 1_000,
            Schema::Definition => 100,
        }
    }
}

/// Recognized `stype_in` values (spec §4.2.1, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StypeIn {
    Continuous,
    Parent,
    Native,
}

impl StypeIn {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "continuous" => StypeIn::Continuous,
            "parent" => StypeIn::Parent,
            "native" => StypeIn::Native,
            _ => return None,
        })
    }
}

/// A loosely-typed scalar value in the adapter/rule-engine boundary
/// ("internal flat dict", spec §2 control flow diagram).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Str(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) => Some(*f as i64),
            FieldValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Decimal(d) => d.to_string().parse().ok(),
            FieldValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Int(i) => Some(Decimal::from(*i)),
            FieldValue::Float(f) => Decimal::try_from(*f).ok(),
            FieldValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}
impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}
impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}
impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
impl From<Decimal> for FieldValue {
    fn from(v: Decimal) -> Self {
        FieldValue::Decimal(v)
    }
}

/// The "internal flat dict" a vendor record is converted to before rule
/// engine / validator processing (spec §4.2 `ToDict`).
pub type FlatRecord = HashMap<String, FieldValue>;

/// The tagged union of validated, typed records (spec §9 design note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Ohlcv(OhlcvRecord),
    Trade(TradeRecord),
    Tbbo(TbboRecord),
    Statistics(StatisticsRecord),
    Definition(DefinitionRecord),
}

impl Record {
    pub fn schema_name(&self) -> &'static str {
        match self {
            Record::Ohlcv(r) => r.granularity.schema().as_str(),
            Record::Trade(_) => Schema::Trades.as_str(),
            Record::Tbbo(_) => Schema::Tbbo.as_str(),
            Record::Statistics(_) => Schema::Statistics.as_str(),
            Record::Definition(_) => Schema::Definition.as_str(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Record::Ohlcv(r) => &r.symbol,
            Record::Trade(r) => &r.symbol,
            Record::Tbbo(r) => &r.symbol,
            Record::Statistics(r) => &r.symbol,
            Record::Definition(r) => &r.symbol,
        }
    }
}

/// Symbol-field repair counters accumulated per chunk (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairStats {
    pub repaired: u64,
    pub failed_repair: u64,
}

impl RepairStats {
    pub fn merge(&mut self, other: &RepairStats) {
        self.repaired += other.repaired;
        self.failed_repair += other.failed_repair;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_alias_parsing_covers_every_documented_spelling() {
        assert_eq!(Schema::parse_alias("ohlcv"), Some(Schema::Ohlcv1D));
        assert_eq!(Schema::parse_alias("OHLCV-1H"), Some(Schema::Ohlcv1H));
        assert_eq!(Schema::parse_alias("definitions"), Some(Schema::Definition));
        assert_eq!(Schema::parse_alias("stats"), Some(Schema::Statistics));
        assert_eq!(Schema::parse_alias("not_a_schema"), None);
    }

    #[test]
    fn batch_size_matches_the_per_schema_table() {
        assert_eq!(Schema::Trades.batch_size(), 10_000);
        assert_eq!(Schema::Tbbo.batch_size(), 15_000);
        assert_eq!(Schema::Statistics.batch_size(), 1_000);
        assert_eq!(Schema::Definition.batch_size(), 100);
        assert_eq!(Schema::Ohlcv1D.batch_size(), 5_000);
    }

    #[test]
    fn stype_in_parses_case_insensitively() {
        assert_eq!(StypeIn::parse("Continuous"), Some(StypeIn::Continuous));
        assert_eq!(StypeIn::parse("PARENT"), Some(StypeIn::Parent));
        assert_eq!(StypeIn::parse("bogus"), None);
    }

    #[test]
    fn field_value_coercions_cross_variants() {
        assert_eq!(FieldValue::Float(42.0).as_i64(), Some(42));
        assert_eq!(FieldValue::Str("7".to_string()).as_i64(), Some(7));
        assert_eq!(FieldValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Null.as_str(), None);
        assert!(FieldValue::Null.is_null());
    }

    #[test]
    fn repair_stats_merge_accumulates_both_counters() {
        let mut a = RepairStats { repaired: 2, failed_repair: 1 };
        let b = RepairStats { repaired: 3, failed_repair: 5 };
        a.merge(&b);
        assert_eq!(a.repaired, 5);
        assert_eq!(a.failed_repair, 6);
    }
}
