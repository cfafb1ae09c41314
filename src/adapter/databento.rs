//! Databento reference adapter (spec §4.2.1).

use super::{AdapterAttemptError, ApiAdapter, Chunk, RetryPolicy};
use crate::config::{ApiConfig, JobConfig};
use crate::error::IngestError;
use crate::models::{FieldValue, FlatRecord, Schema, StypeIn};
use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, instrument};

static PARENT_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+\.(FUT|OPT)$").expect("static regex is valid"));

/// Renames applied at the source, before the rule engine ever sees the
/// record (spec §4.2.1 "Field mapping at source").
const STATISTICS_RENAMES: &[(&str, &str)] = &[("price", "stat_value")];
const TBBO_RENAMES: &[(&str, &str)] = &[
    ("bid_px_00", "bid_px"),
    ("ask_px_00", "ask_px"),
    ("bid_sz_00", "bid_sz"),
    ("ask_sz_00", "ask_sz"),
];

pub struct DatabentoAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl DatabentoAdapter {
    pub fn new(api_config: &ApiConfig, retry_policy: RetryPolicy) -> Result<Self, IngestError> {
        let api_key = crate::config::api_key_from_env(&api_config.key_env_var)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(api_config.timeout))
            .build()
            .map_err(IngestError::Transport)?;
        Ok(DatabentoAdapter {
            client,
            api_key,
            base_url: api_config.base_url.clone(),
            retry_policy,
        })
    }

    /// Spec §4.2.1 "Adapter rejects combinations violating vendor rules".
    fn validate_symbology(stype_in: StypeIn, symbol: &str) -> Result<(), IngestError> {
        if symbol.eq_ignore_ascii_case("ALL_SYMBOLS") {
            return Ok(());
        }
        match stype_in {
            StypeIn::Parent if !PARENT_SYMBOL_RE.is_match(symbol) => Err(IngestError::Symbology(
                format!("'{symbol}' is not a valid parent symbol ([ROOT].FUT|.OPT)"),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ApiAdapter for DatabentoAdapter {
    #[instrument(skip(self, job), fields(job = %job.name))]
    async fn configure(&mut self, job: &JobConfig) -> Result<(), IngestError> {
        let stype_in = StypeIn::parse(&job.stype_in)
            .ok_or_else(|| IngestError::Symbology(format!("unrecognized stype_in '{}'", job.stype_in)))?;
        for symbol in &job.symbols {
            Self::validate_symbology(stype_in, symbol)?;
        }
        info!("adapter configured for job");
        Ok(())
    }

    fn iterate_chunks(&self, job: &JobConfig) -> Result<Vec<Chunk>, IngestError> {
        let start = NaiveDate::parse_from_str(&job.start_date, "%Y-%m-%d")
            .map_err(|e| IngestError::Config(format!("invalid start_date: {e}")))?;
        let end = NaiveDate::parse_from_str(&job.end_date, "%Y-%m-%d")
            .map_err(|e| IngestError::Config(format!("invalid end_date: {e}")))?;
        if start >= end {
            return Err(IngestError::Config(
                "start_date must be strictly before end_date".to_string(),
            ));
        }

        let schema = Schema::parse_alias(&job.schema)
            .ok_or_else(|| IngestError::Config(format!("unrecognized schema '{}'", job.schema)))?;
        let interval_days = job
            .date_chunk_interval_days
            .unwrap_or_else(|| schema.default_chunk_interval_days());

        let mut chunks = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            let chunk_end = (cursor + chrono::Duration::days(interval_days - 1)).min(end);
            chunks.push(Chunk {
                start: cursor,
                end: chunk_end,
                symbols: job.symbols.clone(),
                schema: job.schema.clone(),
                stype_in: job.stype_in.clone(),
            });
            cursor = chunk_end + chrono::Duration::days(1);
        }
        Ok(chunks)
    }

    #[instrument(skip(self, chunk), fields(start = %chunk.start, end = %chunk.end, schema = %chunk.schema))]
    async fn fetch_chunk(&self, chunk: &Chunk) -> Result<Vec<FlatRecord>, IngestError> {
        let url = format!("{}/v0/timeseries.get_range", self.base_url);
        let schema = chunk.schema.clone();
        let symbols = chunk.symbols.join(",");
        let stype_in = chunk.stype_in.clone();
        let start = chunk.start.format("%Y-%m-%d").to_string();
        let end = chunk.end.format("%Y-%m-%d").to_string();

        let raw_rows: Vec<serde_json::Value> = self
            .retry_policy
            .execute_with_retry("fetch_chunk", || {
                let client = self.client.clone();
                let url = url.clone();
                let api_key = self.api_key.clone();
                let schema = schema.clone();
                let symbols = symbols.clone();
                let stype_in = stype_in.clone();
                let start = start.clone();
                let end = end.clone();
                async move {
                    let response = client
                        .get(&url)
                        .basic_auth(&api_key, Some(""))
                        .query(&[
                            ("schema", schema.as_str()),
                            ("symbols", symbols.as_str()),
                            ("stype_in", stype_in.as_str()),
                            ("start", start.as_str()),
                            ("end", end.as_str()),
                        ])
                        .send()
                        .await
                        .map_err(|e| AdapterAttemptError::Retryable {
                            status: None,
                            retry_after: None,
                            message: e.to_string(),
                        })?;

                    let status = response.status();
                    if status.is_success() {
                        let retry_after = None;
                        let _ = retry_after;
                        return response
                            .json::<Vec<serde_json::Value>>()
                            .await
                            .map_err(|e| {
                                AdapterAttemptError::Fatal(IngestError::Mapping {
                                    field: "response_body".to_string(),
                                    reason: e.to_string(),
                                })
                            });
                    }

                    let status_code = status.as_u16();
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    let body = response.text().await.unwrap_or_default();

                    if IngestError::is_retryable_status(status_code) {
                        Err(AdapterAttemptError::Retryable {
                            status: Some(status_code),
                            retry_after,
                            message: body,
                        })
                    } else {
                        Err(AdapterAttemptError::Fatal(IngestError::VendorHttp {
                            status: status_code,
                            body,
                        }))
                    }
                }
            })
            .await?;

        Ok(raw_rows
            .into_iter()
            .map(|row| to_dict(&chunk.schema, row))
            .collect())
    }

    async fn close(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Spec §4.2 `ToDict`: vendor JSON object -> internal flat dict, with the
/// source-level renames from §4.2.1 applied and embedded NULs stripped
/// (Postgres cannot store them).
fn to_dict(schema: &str, value: serde_json::Value) -> FlatRecord {
    let mut dict: FlatRecord = match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, json_to_field_value(v)))
            .collect(),
        _ => FlatRecord::new(),
    };

    let renames: &[(&str, &str)] = if schema == Schema::Statistics.as_str() {
        STATISTICS_RENAMES
    } else if schema == Schema::Tbbo.as_str() {
        TBBO_RENAMES
    } else {
        &[]
    };
    for (source, target) in renames {
        if let Some(v) = dict.remove(*source) {
            dict.insert((*target).to_string(), v);
        }
    }

    sanitize_strings(&mut dict);
    dict
}

fn json_to_field_value(value: serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Null => FieldValue::Null,
        serde_json::Value::Bool(b) => FieldValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Int(i)
            } else {
                FieldValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => FieldValue::Str(s),
        other => FieldValue::Str(other.to_string()),
    }
}

fn sanitize_strings(dict: &mut FlatRecord) {
    for value in dict.values_mut() {
        if let FieldValue::Str(s) = value {
            if s.contains('\0') {
                *s = s.replace('\0', "");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_symbols_bypasses_symbology_validation_for_any_stype() {
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Parent, "ALL_SYMBOLS").is_ok());
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Parent, "all_symbols").is_ok());
    }

    #[test]
    fn parent_stype_requires_root_dot_fut_or_opt() {
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Parent, "ES.FUT").is_ok());
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Parent, "ES.OPT").is_ok());
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Parent, "ES.c.0").is_err());
    }

    #[test]
    fn continuous_and_native_stypes_accept_any_symbol() {
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Continuous, "ES.c.0").is_ok());
        assert!(DatabentoAdapter::validate_symbology(StypeIn::Native, "ESZ3").is_ok());
    }

    fn job_cfg(start_date: &str, end_date: &str) -> JobConfig {
        JobConfig {
            name: "test".to_string(),
            dataset: "GLBX.MDP3".to_string(),
            schema: "ohlcv-1d".to_string(),
            symbols: vec!["ES.c.0".to_string()],
            stype_in: "continuous".to_string(),
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            date_chunk_interval_days: None,
        }
    }

    #[test]
    fn iterate_chunks_rejects_equal_start_and_end_dates() {
        let api_config = ApiConfig {
            key_env_var: "DATABENTO_API_KEY".to_string(),
            base_url: "https://hist.databento.com".to_string(),
            timeout: 30,
        };
        std::env::set_var("DATABENTO_API_KEY", "test-key");
        let adapter = DatabentoAdapter::new(&api_config, RetryPolicy::default()).expect("adapter");
        let result = adapter.iterate_chunks(&job_cfg("2024-01-10", "2024-01-10"));
        assert!(result.is_err());
    }

    #[test]
    fn iterate_chunks_accepts_a_real_span() {
        let api_config = ApiConfig {
            key_env_var: "DATABENTO_API_KEY".to_string(),
            base_url: "https://hist.databento.com".to_string(),
            timeout: 30,
        };
        std::env::set_var("DATABENTO_API_KEY", "test-key");
        let adapter = DatabentoAdapter::new(&api_config, RetryPolicy::default()).expect("adapter");
        let chunks = adapter
            .iterate_chunks(&job_cfg("2024-01-10", "2024-01-12"))
            .expect("valid span");
        assert!(!chunks.is_empty());
    }

    #[test]
    fn to_dict_renames_statistics_price_field() {
        let raw = serde_json::json!({"ts_event": 1, "price": 100.5});
        let dict = to_dict(Schema::Statistics.as_str(), raw);
        assert!(!dict.contains_key("price"));
        assert_eq!(dict.get("stat_value"), Some(&FieldValue::Float(100.5)));
    }

    #[test]
    fn to_dict_renames_tbbo_top_of_book_fields() {
        let raw = serde_json::json!({
            "bid_px_00": 4499.5,
            "ask_px_00": 4500.5,
            "bid_sz_00": 10,
            "ask_sz_00": 5,
        });
        let dict = to_dict(Schema::Tbbo.as_str(), raw);
        assert_eq!(dict.get("bid_px"), Some(&FieldValue::Float(4499.5)));
        assert_eq!(dict.get("ask_px"), Some(&FieldValue::Float(4500.5)));
        assert_eq!(dict.get("bid_sz"), Some(&FieldValue::Int(10)));
        assert_eq!(dict.get("ask_sz"), Some(&FieldValue::Int(5)));
    }

    #[test]
    fn to_dict_leaves_other_schemas_unrenamed() {
        let raw = serde_json::json!({"price": 4500.5});
        let dict = to_dict(Schema::Trades.as_str(), raw);
        assert_eq!(dict.get("price"), Some(&FieldValue::Float(4500.5)));
    }

    #[test]
    fn sanitize_strings_strips_embedded_nul_bytes() {
        let mut dict = FlatRecord::new();
        dict.insert("symbol".to_string(), FieldValue::Str("ES\0FUT".to_string()));
        sanitize_strings(&mut dict);
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("ESFUT".to_string())));
    }

    #[test]
    fn json_to_field_value_picks_int_over_float_when_exact() {
        assert_eq!(json_to_field_value(serde_json::json!(42)), FieldValue::Int(42));
        assert_eq!(json_to_field_value(serde_json::json!(4.5)), FieldValue::Float(4.5));
        assert_eq!(json_to_field_value(serde_json::Value::Null), FieldValue::Null);
    }
}
