//! Query Builder (spec §4.7): range/symbol queries over the hypertables,
//! with symbol resolution falling back to a direct hypertable scan when
//! `definitions_data` does not exist.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// A single output row as a loosely-typed map, matching the loosely-typed
/// dict the rest of the pipeline uses at its boundaries.
pub type ResultRow = std::collections::HashMap<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("symbol resolution error: {0}")]
    SymbolResolution(String),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

const UNKNOWN: u8 = 0;
const PRESENT: u8 = 1;
const ABSENT: u8 = 2;

/// Caches whether `definitions_data` exists for the lifetime of one
/// `QueryBuilder` (spec §4.7: "checked once and cached per session").
struct DefinitionsTableState {
    checked: AtomicU8,
}

impl DefinitionsTableState {
    fn new() -> Self {
        DefinitionsTableState {
            checked: AtomicU8::new(UNKNOWN),
        }
    }
}

pub struct QueryBuilder {
    pool: PgPool,
    definitions_state: DefinitionsTableState,
    warned_fallback: AtomicBool,
}

impl QueryBuilder {
    pub fn new(pool: PgPool) -> Self {
        QueryBuilder {
            pool,
            definitions_state: DefinitionsTableState::new(),
            warned_fallback: AtomicBool::new(false),
        }
    }

    async fn definitions_table_exists(&self) -> Result<bool, QueryError> {
        match self.definitions_state.checked.load(Ordering::Acquire) {
            PRESENT => return Ok(true),
            ABSENT => return Ok(false),
            _ => {}
        }
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_name = 'definitions_data')",
        )
        .fetch_one(&self.pool)
        .await?;
        self.definitions_state
            .checked
            .store(if exists { PRESENT } else { ABSENT }, Ordering::Release);
        Ok(exists)
    }

    /// Resolves symbols to instrument ids via `definitions_data`; on
    /// `SymbolResolutionError` (table missing), the caller falls back to a
    /// direct-by-symbol query instead (spec §4.7).
    async fn resolve_instrument_ids(&self, symbols: &[String]) -> Result<Vec<i64>, QueryError> {
        if !self.definitions_table_exists().await? {
            return Err(QueryError::SymbolResolution(
                "definitions_data table does not exist".to_string(),
            ));
        }
        let rows = sqlx::query(
            "SELECT DISTINCT instrument_id FROM definitions_data WHERE symbol = ANY($1)",
        )
        .bind(symbols)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("instrument_id")).collect())
    }

    fn note_fallback(&self, reason: &str) {
        if !self.warned_fallback.swap(true, Ordering::Relaxed) {
            tracing::warn!(reason, "falling back to direct-by-symbol query");
        }
    }

    pub async fn query_daily_ohlcv(
        &self,
        symbols: &[String],
        start: i64,
        end: i64,
        granularity: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        let rows = match self.resolve_instrument_ids(symbols).await {
            Ok(ids) => {
                sqlx::query(
                    "SELECT * FROM daily_ohlcv_data WHERE instrument_id = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::text IS NULL OR granularity = $4) \
                     ORDER BY ts_event LIMIT $5",
                )
                .bind(ids)
                .bind(start)
                .bind(end)
                .bind(granularity)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(QueryError::SymbolResolution(reason)) => {
                self.note_fallback(&reason);
                sqlx::query(
                    "SELECT * FROM daily_ohlcv_data WHERE symbol = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::text IS NULL OR granularity = $4) \
                     ORDER BY ts_event LIMIT $5",
                )
                .bind(symbols)
                .bind(start)
                .bind(end)
                .bind(granularity)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(other) => return Err(other),
        };
        Ok(rows.into_iter().map(ohlcv_row_to_map).collect())
    }

    pub async fn query_trades(
        &self,
        symbols: &[String],
        start: i64,
        end: i64,
        side: Option<char>,
        min_volume: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        let side_str = side.map(|c| c.to_string());
        let rows = match self.resolve_instrument_ids(symbols).await {
            Ok(ids) => {
                sqlx::query(
                    "SELECT * FROM trades_data WHERE instrument_id = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::text IS NULL OR side = $4) \
                     AND ($5::bigint IS NULL OR size >= $5) \
                     ORDER BY ts_event LIMIT $6",
                )
                .bind(ids)
                .bind(start)
                .bind(end)
                .bind(&side_str)
                .bind(min_volume)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(QueryError::SymbolResolution(reason)) => {
                self.note_fallback(&reason);
                sqlx::query(
                    "SELECT * FROM trades_data WHERE symbol = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::text IS NULL OR side = $4) \
                     AND ($5::bigint IS NULL OR size >= $5) \
                     ORDER BY ts_event LIMIT $6",
                )
                .bind(symbols)
                .bind(start)
                .bind(end)
                .bind(&side_str)
                .bind(min_volume)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(other) => return Err(other),
        };
        Ok(rows.into_iter().map(trade_row_to_map).collect())
    }

    pub async fn query_tbbo(
        &self,
        symbols: &[String],
        start: i64,
        end: i64,
        limit: Option<i64>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        let rows = match self.resolve_instrument_ids(symbols).await {
            Ok(ids) => {
                sqlx::query(
                    "SELECT * FROM tbbo_data WHERE instrument_id = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 ORDER BY ts_event LIMIT $4",
                )
                .bind(ids)
                .bind(start)
                .bind(end)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(QueryError::SymbolResolution(reason)) => {
                self.note_fallback(&reason);
                sqlx::query(
                    "SELECT * FROM tbbo_data WHERE symbol = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 ORDER BY ts_event LIMIT $4",
                )
                .bind(symbols)
                .bind(start)
                .bind(end)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(other) => return Err(other),
        };
        Ok(rows.into_iter().map(tbbo_row_to_map).collect())
    }

    pub async fn query_statistics(
        &self,
        symbols: &[String],
        start: i64,
        end: i64,
        stat_type: Option<i32>,
        limit: Option<i64>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        let rows = match self.resolve_instrument_ids(symbols).await {
            Ok(ids) => {
                sqlx::query(
                    "SELECT * FROM statistics_data WHERE instrument_id = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::int IS NULL OR stat_type = $4) \
                     ORDER BY ts_event LIMIT $5",
                )
                .bind(ids)
                .bind(start)
                .bind(end)
                .bind(stat_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(QueryError::SymbolResolution(reason)) => {
                self.note_fallback(&reason);
                sqlx::query(
                    "SELECT * FROM statistics_data WHERE symbol = ANY($1) \
                     AND ts_event BETWEEN $2 AND $3 \
                     AND ($4::int IS NULL OR stat_type = $4) \
                     ORDER BY ts_event LIMIT $5",
                )
                .bind(symbols)
                .bind(start)
                .bind(end)
                .bind(stat_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Err(other) => return Err(other),
        };
        Ok(rows.into_iter().map(statistics_row_to_map).collect())
    }

    pub async fn query_definitions(
        &self,
        symbols: &[String],
        start: i64,
        end: i64,
        asset: Option<&str>,
        exchange: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        let rows = sqlx::query(
            "SELECT * FROM definitions_data WHERE symbol = ANY($1) \
             AND ts_event BETWEEN $2 AND $3 \
             AND ($4::text IS NULL OR asset = $4) \
             AND ($5::text IS NULL OR exchange = $5) \
             ORDER BY ts_event LIMIT $6",
        )
        .bind(symbols)
        .bind(start)
        .bind(end)
        .bind(asset)
        .bind(exchange)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(definition_row_to_map).collect())
    }

    pub async fn get_available_symbols(
        &self,
        asset: Option<&str>,
        exchange: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<String>, QueryError> {
        let limit = limit.unwrap_or(10_000);
        if self.definitions_table_exists().await? {
            let rows: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT symbol FROM definitions_data \
                 WHERE ($1::text IS NULL OR asset = $1) \
                 AND ($2::text IS NULL OR exchange = $2) LIMIT $3",
            )
            .bind(asset)
            .bind(exchange)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        } else {
            self.note_fallback("definitions_data table does not exist");
            let rows: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT symbol FROM daily_ohlcv_data LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

fn num(v: Option<Decimal>) -> serde_json::Value {
    v.map(|d| serde_json::Value::String(d.to_string()))
        .unwrap_or(serde_json::Value::Null)
}

fn opt<T: Into<serde_json::Value>>(v: Option<T>) -> serde_json::Value {
    v.map(Into::into).unwrap_or(serde_json::Value::Null)
}

/// Every column `ohlcv_loader.rs` persists, not a hand-picked subset (spec
/// §4.7 "a helper converts to a tabular representation" of the whole row).
fn ohlcv_row_to_map(row: sqlx::postgres::PgRow) -> ResultRow {
    let mut m = ResultRow::new();
    m.insert("ts_event".into(), row.get::<i64, _>("ts_event").into());
    m.insert("instrument_id".into(), row.get::<i64, _>("instrument_id").into());
    m.insert("symbol".into(), row.get::<String, _>("symbol").into());
    m.insert("open_price".into(), num(Some(row.get("open_price"))));
    m.insert("high_price".into(), num(Some(row.get("high_price"))));
    m.insert("low_price".into(), num(Some(row.get("low_price"))));
    m.insert("close_price".into(), num(Some(row.get("close_price"))));
    m.insert("volume".into(), row.get::<i64, _>("volume").into());
    m.insert("trade_count".into(), opt(row.get::<Option<i64>, _>("trade_count")));
    m.insert("vwap".into(), num(row.get("vwap")));
    m.insert("granularity".into(), row.get::<String, _>("granularity").into());
    m.insert("data_source".into(), row.get::<String, _>("data_source").into());
    m
}

/// Every column `trade_loader.rs` persists.
fn trade_row_to_map(row: sqlx::postgres::PgRow) -> ResultRow {
    let mut m = ResultRow::new();
    m.insert("ts_event".into(), row.get::<i64, _>("ts_event").into());
    m.insert("ts_recv".into(), row.get::<i64, _>("ts_recv").into());
    m.insert("publisher_id".into(), row.get::<i32, _>("publisher_id").into());
    m.insert("instrument_id".into(), row.get::<i64, _>("instrument_id").into());
    m.insert("symbol".into(), row.get::<String, _>("symbol").into());
    m.insert("price".into(), num(Some(row.get("price"))));
    m.insert("size".into(), row.get::<i64, _>("size").into());
    m.insert("action".into(), row.get::<String, _>("action").into());
    m.insert("side".into(), row.get::<String, _>("side").into());
    m.insert("flags".into(), row.get::<i32, _>("flags").into());
    m.insert("depth".into(), row.get::<i32, _>("depth").into());
    m.insert("sequence".into(), row.get::<i64, _>("sequence").into());
    m.insert("ts_in_delta".into(), opt(row.get::<Option<i64>, _>("ts_in_delta")));
    m
}

/// Every column `tbbo_loader.rs` persists.
fn tbbo_row_to_map(row: sqlx::postgres::PgRow) -> ResultRow {
    let mut m = ResultRow::new();
    m.insert("ts_event".into(), row.get::<i64, _>("ts_event").into());
    m.insert("ts_recv".into(), row.get::<i64, _>("ts_recv").into());
    m.insert("publisher_id".into(), row.get::<i32, _>("publisher_id").into());
    m.insert("instrument_id".into(), row.get::<i64, _>("instrument_id").into());
    m.insert("symbol".into(), row.get::<String, _>("symbol").into());
    m.insert("bid_px".into(), num(row.get("bid_px")));
    m.insert("ask_px".into(), num(row.get("ask_px")));
    m.insert("bid_sz".into(), opt(row.get::<Option<i64>, _>("bid_sz")));
    m.insert("ask_sz".into(), opt(row.get::<Option<i64>, _>("ask_sz")));
    m.insert("bid_ct".into(), opt(row.get::<Option<i64>, _>("bid_ct")));
    m.insert("ask_ct".into(), opt(row.get::<Option<i64>, _>("ask_ct")));
    m.insert("sequence".into(), row.get::<i64, _>("sequence").into());
    m.insert("flags".into(), opt(row.get::<Option<i32>, _>("flags")));
    m
}

/// Every column `statistics_loader.rs` persists.
fn statistics_row_to_map(row: sqlx::postgres::PgRow) -> ResultRow {
    let mut m = ResultRow::new();
    m.insert("ts_event".into(), row.get::<i64, _>("ts_event").into());
    m.insert("ts_recv".into(), row.get::<i64, _>("ts_recv").into());
    m.insert("ts_ref".into(), opt(row.get::<Option<i64>, _>("ts_ref")));
    m.insert("publisher_id".into(), row.get::<i32, _>("publisher_id").into());
    m.insert("instrument_id".into(), row.get::<i64, _>("instrument_id").into());
    m.insert("symbol".into(), row.get::<String, _>("symbol").into());
    m.insert("stat_type".into(), row.get::<i32, _>("stat_type").into());
    m.insert("stat_value".into(), num(row.get("stat_value")));
    m.insert("quantity".into(), opt(row.get::<Option<i64>, _>("quantity")));
    m.insert("sequence".into(), opt(row.get::<Option<i64>, _>("sequence")));
    m.insert("ts_in_delta".into(), opt(row.get::<Option<i64>, _>("ts_in_delta")));
    m.insert("channel_id".into(), opt(row.get::<Option<i32>, _>("channel_id")));
    m.insert("update_action".into(), row.get::<i32, _>("update_action").into());
    m.insert("stat_flags".into(), opt(row.get::<Option<i32>, _>("stat_flags")));
    m
}

/// Every column `definition_loader.rs` persists, including the `extra`
/// catch-all JSONB column (spec §4.4 non-strict validation).
fn definition_row_to_map(row: sqlx::postgres::PgRow) -> ResultRow {
    let mut m = ResultRow::new();
    m.insert("ts_event".into(), row.get::<i64, _>("ts_event").into());
    m.insert("ts_recv".into(), row.get::<i64, _>("ts_recv").into());
    m.insert("publisher_id".into(), row.get::<i32, _>("publisher_id").into());
    m.insert("instrument_id".into(), row.get::<i64, _>("instrument_id").into());
    m.insert("raw_instrument_id".into(), opt(row.get::<Option<i64>, _>("raw_instrument_id")));
    m.insert("symbol".into(), row.get::<String, _>("symbol").into());
    m.insert("raw_symbol".into(), opt(row.get::<Option<String>, _>("raw_symbol")));
    m.insert("security_update_action".into(), row.get::<String, _>("security_update_action").into());
    m.insert("instrument_class".into(), row.get::<String, _>("instrument_class").into());
    m.insert("min_price_increment".into(), num(Some(row.get("min_price_increment"))));
    m.insert("display_factor".into(), num(Some(row.get("display_factor"))));
    m.insert("expiration".into(), row.get::<i64, _>("expiration").into());
    m.insert("activation".into(), row.get::<i64, _>("activation").into());
    m.insert("high_limit_price".into(), num(row.get("high_limit_price")));
    m.insert("low_limit_price".into(), num(row.get("low_limit_price")));
    m.insert("max_price_variation".into(), num(row.get("max_price_variation")));
    m.insert("trading_reference_price".into(), num(row.get("trading_reference_price")));
    m.insert("unit_of_measure_qty".into(), num(row.get("unit_of_measure_qty")));
    m.insert("min_price_increment_amount".into(), num(row.get("min_price_increment_amount")));
    m.insert("price_ratio".into(), num(row.get("price_ratio")));
    m.insert("strike_price".into(), num(row.get("strike_price")));
    m.insert("strike_price_currency".into(), opt(row.get::<Option<String>, _>("strike_price_currency")));
    m.insert("inst_attrib_value".into(), opt(row.get::<Option<i64>, _>("inst_attrib_value")));
    m.insert("underlying_id".into(), opt(row.get::<Option<i64>, _>("underlying_id")));
    m.insert("market_depth_implied".into(), opt(row.get::<Option<i32>, _>("market_depth_implied")));
    m.insert("market_depth".into(), opt(row.get::<Option<i32>, _>("market_depth")));
    m.insert("market_segment_id".into(), opt(row.get::<Option<i32>, _>("market_segment_id")));
    m.insert("max_trade_vol".into(), opt(row.get::<Option<i64>, _>("max_trade_vol")));
    m.insert("min_lot_size".into(), opt(row.get::<Option<i64>, _>("min_lot_size")));
    m.insert("min_lot_size_block".into(), opt(row.get::<Option<i64>, _>("min_lot_size_block")));
    m.insert("min_lot_size_round_lot".into(), opt(row.get::<Option<i64>, _>("min_lot_size_round_lot")));
    m.insert("min_trade_vol".into(), opt(row.get::<Option<i64>, _>("min_trade_vol")));
    m.insert("contract_multiplier".into(), opt(row.get::<Option<i32>, _>("contract_multiplier")));
    m.insert("contract_multiplier_unit".into(), opt(row.get::<Option<i32>, _>("contract_multiplier_unit")));
    m.insert("decay_quantity".into(), opt(row.get::<Option<i32>, _>("decay_quantity")));
    m.insert("decay_start_date".into(), opt(row.get::<Option<i64>, _>("decay_start_date")));
    m.insert("original_contract_size".into(), opt(row.get::<Option<i64>, _>("original_contract_size")));
    m.insert("trading_reference_date".into(), opt(row.get::<Option<i64>, _>("trading_reference_date")));
    m.insert("appl_id".into(), opt(row.get::<Option<i32>, _>("appl_id")));
    m.insert("maturity_year".into(), opt(row.get::<Option<i32>, _>("maturity_year")));
    m.insert("maturity_month".into(), opt(row.get::<Option<i32>, _>("maturity_month")));
    m.insert("maturity_day".into(), opt(row.get::<Option<i32>, _>("maturity_day")));
    m.insert("maturity_week".into(), opt(row.get::<Option<i32>, _>("maturity_week")));
    m.insert("currency".into(), opt(row.get::<Option<String>, _>("currency")));
    m.insert("settl_currency".into(), opt(row.get::<Option<String>, _>("settl_currency")));
    m.insert("secsubtype".into(), opt(row.get::<Option<String>, _>("secsubtype")));
    m.insert("group".into(), opt(row.get::<Option<String>, _>("group_code")));
    m.insert("exchange".into(), opt(row.get::<Option<String>, _>("exchange")));
    m.insert("asset".into(), opt(row.get::<Option<String>, _>("asset")));
    m.insert("cfi".into(), opt(row.get::<Option<String>, _>("cfi")));
    m.insert("security_type".into(), opt(row.get::<Option<String>, _>("security_type")));
    m.insert("unit_of_measure".into(), opt(row.get::<Option<String>, _>("unit_of_measure")));
    m.insert("underlying".into(), opt(row.get::<Option<String>, _>("underlying")));
    m.insert("match_algorithm".into(), opt(row.get::<Option<String>, _>("match_algorithm")));
    m.insert("md_security_trading_status".into(), opt(row.get::<Option<i32>, _>("md_security_trading_status")));
    m.insert("main_fraction".into(), opt(row.get::<Option<i32>, _>("main_fraction")));
    m.insert("sub_fraction".into(), opt(row.get::<Option<i32>, _>("sub_fraction")));
    m.insert("price_display_format".into(), opt(row.get::<Option<i32>, _>("price_display_format")));
    m.insert("settl_price_type".into(), opt(row.get::<Option<i32>, _>("settl_price_type")));
    m.insert("underlying_product".into(), opt(row.get::<Option<i32>, _>("underlying_product")));
    m.insert("flow_schedule_type".into(), opt(row.get::<Option<i32>, _>("flow_schedule_type")));
    m.insert("tick_rule".into(), opt(row.get::<Option<i32>, _>("tick_rule")));
    m.insert("channel_id".into(), row.get::<i32, _>("channel_id").into());
    m.insert("user_defined_instrument".into(), opt(row.get::<Option<String>, _>("user_defined_instrument")));
    m.insert("leg_count".into(), row.get::<i32, _>("leg_count").into());
    m.insert("leg_index".into(), opt(row.get::<Option<i32>, _>("leg_index")));
    m.insert("leg_instrument_id".into(), opt(row.get::<Option<i64>, _>("leg_instrument_id")));
    m.insert("leg_price".into(), num(row.get("leg_price")));
    m.insert("leg_side".into(), opt(row.get::<Option<String>, _>("leg_side")));
    m.insert("leg_ratio_price_numerator".into(), opt(row.get::<Option<i32>, _>("leg_ratio_price_numerator")));
    m.insert("leg_ratio_price_denominator".into(), opt(row.get::<Option<i32>, _>("leg_ratio_price_denominator")));
    m.insert("leg_ratio_qty_numerator".into(), opt(row.get::<Option<i32>, _>("leg_ratio_qty_numerator")));
    m.insert("leg_ratio_qty_denominator".into(), opt(row.get::<Option<i32>, _>("leg_ratio_qty_denominator")));
    m.insert("leg_underlying_id".into(), opt(row.get::<Option<i64>, _>("leg_underlying_id")));
    m.insert("extra".into(), row.get::<serde_json::Value, _>("extra"));
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub symbols: Vec<String>,
    pub start: i64,
    pub end: i64,
    pub limit: Option<i64>,
}
