//! YAML shape of a mapping configuration file (spec §4.3, referenced from
//! job config as `transformation.mapping_config_path`).

use crate::models::{FieldValue, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformRule {
    /// `decimal_conversion(precision, scaling_factor)`.
    DecimalConversion { field: String, precision: u32, scaling_factor: f64 },
    /// `datetime_conversion(source_format, target_format)`.
    DatetimeConversion {
        field: String,
        source_format: String,
        target_format: String,
    },
    /// `symbol_normalization(regex -> replacement)`.
    SymbolNormalization { field: String, pattern: String, replacement: String },
    /// Arithmetic calculated field, e.g. `vwap = notional / volume`.
    CalculatedField {
        target: String,
        numerator: String,
        denominator: String,
    },
    /// Predicate rule; violating it is a validation error on `field`.
    Predicate { field: String, expr: PredicateExpr },
}

/// A small closed set of comparisons the engine can evaluate without a full
/// expression parser (spec §4.3 examples: `value > 0`, `high_price >=
/// low_price`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredicateExpr {
    GreaterThan { field: String, than: f64 },
    GreaterThanOrEqualField { field: String, than_field: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionalTransformation {
    pub when_field: String,
    pub when_equals: FieldValue,
    pub set_field: String,
    pub set_value: FieldValue,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchemaMapping {
    #[serde(default)]
    pub field_mappings: HashMap<String, String>,
    #[serde(default)]
    pub transformations: Vec<TransformRule>,
    #[serde(default)]
    pub defaults: HashMap<String, FieldValue>,
    #[serde(default)]
    pub conditional_transformations: Vec<ConditionalTransformation>,
}

/// Top-level mapping config file: one `SchemaMapping` per schema name
/// (spec §4.3, §6.1 `transformation.mapping_config_path`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MappingConfig {
    #[serde(flatten)]
    pub schemas: HashMap<String, SchemaMapping>,
}

impl MappingConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn for_schema(&self, schema: Schema) -> Option<&SchemaMapping> {
        self.schemas.get(schema.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAPPING: &str = r#"
trades:
  field_mappings:
    px: price
  transformations:
    - kind: decimal_conversion
      field: price
      precision: 9
      scaling_factor: 1.0
    - kind: symbol_normalization
      field: symbol
      pattern: "\\.c\\.0$"
      replacement: ""
  defaults:
    action: T
  conditional_transformations:
    - when_field: instrument_class
      when_equals: FUT
      set_field: is_spread
      set_value: false
ohlcv-1d:
  defaults:
    granularity: 1d
    data_source: databento
"#;

    #[test]
    fn parses_field_mappings_transformations_and_defaults_per_schema() {
        let config = MappingConfig::from_yaml_str(SAMPLE_MAPPING).expect("should parse");

        let trades = config.for_schema(Schema::Trades).expect("trades mapping present");
        assert_eq!(trades.field_mappings.get("px"), Some(&"price".to_string()));
        assert_eq!(trades.transformations.len(), 2);
        assert_eq!(trades.defaults.get("action"), Some(&FieldValue::Str("T".to_string())));
        assert_eq!(trades.conditional_transformations.len(), 1);
    }

    #[test]
    fn schema_with_no_mapping_entry_returns_none() {
        let config = MappingConfig::from_yaml_str(SAMPLE_MAPPING).expect("should parse");
        assert!(config.for_schema(Schema::Tbbo).is_none());
    }

    #[test]
    fn empty_config_parses_to_an_empty_schema_map() {
        let config = MappingConfig::from_yaml_str("{}").expect("should parse");
        assert!(config.for_schema(Schema::Ohlcv1D).is_none());
    }
}
