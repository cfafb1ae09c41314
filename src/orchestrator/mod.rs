//! Pipeline Orchestrator (spec §4.1): drives one job end to end
//! (adapter -> rule engine -> loader), tracking stats and dispatching
//! schema-specific dict repair, retries, and quarantine.

use crate::adapter::{ApiAdapter, Chunk};
use crate::config::JobConfig;
use crate::error::IngestError;
use crate::models::{FieldValue, FlatRecord, RepairStats, Schema};
use crate::quarantine::{QuarantineEntry, QuarantineSink};
use crate::rules::mapping_config::MappingConfig;
use crate::rules::RuleEngine;
use crate::storage::definition_loader::DefinitionLoader;
use crate::storage::ohlcv_loader::OhlcvLoader;
use crate::storage::statistics_loader::StatisticsLoader;
use crate::storage::tbbo_loader::TbboLoader;
use crate::storage::trade_loader::TradeLoader;
use crate::storage::Loader;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Normalized job description (spec §4.1: "orchestrator normalizes schema
/// aliases... and synthesizes a job name if absent").
#[derive(Debug, Clone)]
pub struct Job {
    pub api_name: String,
    pub dataset: String,
    pub schema: Schema,
    pub symbols: Vec<String>,
    pub stype_in: String,
    pub start_date: String,
    pub end_date: String,
    pub date_chunk_interval_days: Option<i64>,
    pub job_name: String,
}

impl Job {
    pub fn from_config(api_name: &str, cfg: &JobConfig) -> Result<Self, IngestError> {
        let schema = Schema::parse_alias(&cfg.schema)
            .ok_or_else(|| IngestError::Config(format!("unrecognized schema '{}'", cfg.schema)))?;
        let job_name = if cfg.name.is_empty() {
            format!("cli_{}_{}", schema.as_str(), cfg.symbols.join("-"))
        } else {
            cfg.name.clone()
        };
        Ok(Job {
            api_name: api_name.to_string(),
            dataset: cfg.dataset.clone(),
            schema,
            symbols: cfg.symbols.clone(),
            stype_in: cfg.stype_in.clone(),
            start_date: cfg.start_date.clone(),
            end_date: cfg.end_date.clone(),
            date_chunk_interval_days: cfg.date_chunk_interval_days,
            job_name,
        })
    }
}

/// Stats returned from one `Orchestrator::run` call (spec §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Correlates this run's log lines and quarantine entries; generated
    /// fresh per call, the way the teacher stamps a `span_id`/
    /// `client_order_id` on each vault order (`vault/fast15m_reactive.rs`).
    pub run_id: String,
    pub chunks_total: u64,
    pub chunks_ok: u64,
    pub chunks_retried: u64,
    pub chunks_failed: u64,
    pub records_fetched: u64,
    pub records_transformed: u64,
    pub records_stored: u64,
    pub records_quarantined: u64,
    pub errors_encountered: u64,
    pub repair_stats: RepairStats,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub cancelled: bool,
}

/// Progress stages emitted during a run (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Fetching,
    Transforming,
    Validating,
    Storing,
    Done,
}

pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, stage: ProgressStage, count: u64, message: Option<&str>);
}

/// A `ProgressCallback` that only logs (spec §7: "structured diagnostics
/// emitted to the logger interface, never to stdout from core code").
pub struct TracingProgress;

impl ProgressCallback for TracingProgress {
    fn on_progress(&self, stage: ProgressStage, count: u64, message: Option<&str>) {
        info!(stage = ?stage, count, message, "progress");
    }
}

/// Bound on in-flight chunks between the fetcher and the
/// transform/validate/store stage (spec §5: "small queues <= 4 chunks").
const PIPELINE_DEPTH: usize = 4;

/// Bounded number of times a loader transaction is retried before its
/// chunk's rows are quarantined with the DB error as context (spec §4.1).
const LOADER_RETRY_LIMIT: u32 = 1;

/// What the fetch task learned about one chunk, threaded through the
/// fetch/load channel so the consumer can tell a chunk that genuinely
/// fetched zero rows (e.g. a weekend date range) apart from one whose
/// fetch exhausted its retries (spec §4.1 chunk-level retry).
enum FetchOutcome {
    Records(Vec<FlatRecord>),
    Empty,
    Failed,
}

/// Outcome of `Orchestrator::store_with_retry` for one chunk: `stored` and
/// `failed` partition the chunk's validated rows between what committed and
/// what needs quarantining; `last_error` is the most recent storage error
/// observed, kept for the quarantine reason and log line.
#[derive(Default)]
struct StoreOutcome {
    stored: u64,
    failed: u64,
    retried: bool,
    last_error: Option<IngestError>,
}

pub struct Orchestrator {
    pool: PgPool,
    mapping_config: MappingConfig,
    quarantine: QuarantineSink,
    ohlcv_loader: OhlcvLoader,
    trade_loader: TradeLoader,
    tbbo_loader: TbboLoader,
    statistics_loader: StatisticsLoader,
    definition_loader: DefinitionLoader,
}

impl Orchestrator {
    pub fn new(pool: PgPool, mapping_config: MappingConfig, quarantine: QuarantineSink) -> Self {
        Orchestrator {
            pool,
            mapping_config,
            quarantine,
            ohlcv_loader: OhlcvLoader,
            trade_loader: TradeLoader,
            tbbo_loader: TbboLoader,
            statistics_loader: StatisticsLoader,
            definition_loader: DefinitionLoader,
        }
    }

    fn loader_for(&self, schema: Schema) -> &dyn Loader {
        match schema {
            Schema::Ohlcv1S
            | Schema::Ohlcv1M
            | Schema::Ohlcv5M
            | Schema::Ohlcv15M
            | Schema::Ohlcv1H
            | Schema::Ohlcv1D => &self.ohlcv_loader,
            Schema::Trades => &self.trade_loader,
            Schema::Tbbo => &self.tbbo_loader,
            Schema::Statistics => &self.statistics_loader,
            Schema::Definition => &self.definition_loader,
        }
    }

    pub async fn ensure_schema(&self, schema: Schema) -> Result<(), IngestError> {
        self.loader_for(schema)
            .ensure_schema(&self.pool)
            .await
            .map_err(IngestError::Storage)
    }

    /// Runs one job end to end (spec §4.1).
    pub async fn run(
        &self,
        job: &Job,
        adapter: Arc<dyn ApiAdapter>,
        progress: &dyn ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<Stats, IngestError> {
        let mut stats = Stats {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Some(now_micros()),
            ..Default::default()
        };

        self.ensure_schema(job.schema).await?;

        let job_cfg = to_job_config(job);
        let chunks = adapter.iterate_chunks(&job_cfg)?;
        stats.chunks_total = chunks.len() as u64;

        let (tx, mut rx) = mpsc::channel::<(Chunk, FetchOutcome)>(PIPELINE_DEPTH);

        let fetch_cancel = cancel.clone();
        let chunks_to_fetch = chunks.clone();
        let fetch_adapter = Arc::clone(&adapter);
        let fetch_handle = tokio::spawn(async move {
            for chunk in chunks_to_fetch {
                if fetch_cancel.is_cancelled() {
                    break;
                }
                match fetch_adapter.fetch_chunk(&chunk).await {
                    Ok(records) => {
                        let outcome = if records.is_empty() {
                            FetchOutcome::Empty
                        } else {
                            FetchOutcome::Records(records)
                        };
                        if tx.send((chunk, outcome)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "chunk fetch failed after retries");
                        if tx.send((chunk, FetchOutcome::Failed)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Once cancellation is noticed, the fetcher stops enqueueing new
        // chunks (it checks `fetch_cancel` before each one) but may still be
        // parked on `tx.send` for a chunk already in flight when the channel
        // is full. Breaking out of this loop immediately would leave that
        // send permanently blocked, since `rx` would not be dropped until
        // after `fetch_handle` is awaited below. Keep draining instead, so
        // the channel empties and `fetch_handle` can run to completion
        // (spec §5 "drains in-flight chunks, best-effort").
        while let Some((chunk, fetch_outcome)) = rx.recv().await {
            if cancel.is_cancelled() {
                stats.cancelled = true;
            }

            let records = match fetch_outcome {
                FetchOutcome::Failed => {
                    stats.chunks_failed += 1;
                    metrics::counter!(crate::metrics::CHUNKS_FAILED).increment(1);
                    continue;
                }
                FetchOutcome::Empty => Vec::new(),
                FetchOutcome::Records(records) => records,
            };

            progress.on_progress(ProgressStage::Fetching, records.len() as u64, None);
            stats.records_fetched += records.len() as u64;
            metrics::counter!(crate::metrics::RECORDS_FETCHED).increment(records.len() as u64);

            if records.is_empty() {
                // The fetch genuinely succeeded with no rows (e.g. a weekend
                // date range) -- distinct from `FetchOutcome::Failed` above,
                // this is not a failure and must not be counted as one.
                stats.chunks_ok += 1;
                metrics::counter!(crate::metrics::CHUNKS_OK).increment(1);
                continue;
            }

            let (repaired, repair_stats) = self.repair_chunk(job.schema, &chunk, records);
            stats.repair_stats.merge(&repair_stats);

            progress.on_progress(ProgressStage::Transforming, repaired.len() as u64, None);
            let engine = RuleEngine::new(&self.mapping_config);
            let outcome = engine.apply_batch(job.schema, repaired, now_micros());
            stats.records_transformed += outcome.validated.len() as u64;
            metrics::counter!(crate::metrics::RECORDS_TRANSFORMED)
                .increment(outcome.validated.len() as u64);

            progress.on_progress(ProgressStage::Validating, outcome.rejected.len() as u64, None);
            for rejected in &outcome.rejected {
                stats.records_quarantined += 1;
                metrics::counter!(crate::metrics::RECORDS_QUARANTINED).increment(1);
                stats.errors_encountered += rejected.errors.len() as u64;
                let entry = QuarantineEntry {
                    job_id: job.job_name.clone(),
                    chunk_id: chunk_id(&chunk),
                    schema: job.schema.as_str().to_string(),
                    reason: "validation_error".to_string(),
                    errors: rejected.errors.clone(),
                    raw_record: rejected.raw.clone(),
                };
                if let Err(e) = self.quarantine.write(&entry) {
                    warn!(error = %e, "failed to write quarantine entry");
                }
            }

            for row in &outcome.validated {
                for diagnostic in &row.diagnostics {
                    warn!(
                        schema = job.schema.as_str(),
                        symbol = %row.record.symbol(),
                        severity = ?diagnostic.severity,
                        field = %diagnostic.field,
                        reason = %diagnostic.reason,
                        "row passed validation with a non-error diagnostic"
                    );
                }
            }

            progress.on_progress(ProgressStage::Storing, outcome.validated.len() as u64, None);
            let records: Vec<crate::models::Record> =
                outcome.validated.into_iter().map(|row| row.record).collect();
            let store_outcome = self.store_with_retry(job.schema, &records).await;

            stats.records_stored += store_outcome.stored;
            metrics::counter!(crate::metrics::RECORDS_STORED).increment(store_outcome.stored);
            if store_outcome.retried {
                stats.chunks_retried += 1;
                metrics::counter!(crate::metrics::CHUNKS_RETRIED).increment(1);
            }

            if store_outcome.failed > 0 {
                stats.chunks_failed += 1;
                stats.errors_encountered += 1;
                metrics::counter!(crate::metrics::CHUNKS_FAILED).increment(1);
                let reason = store_outcome
                    .last_error
                    .as_ref()
                    .map(|e| format!("storage_error: {e}"))
                    .unwrap_or_else(|| "storage_error".to_string());
                warn!(
                    error = %reason,
                    failed = store_outcome.failed,
                    "loader transaction failed; quarantining rows that did not commit"
                );
                // Only the rows from the failed sub-batch(es) are quarantined --
                // rows committed by an earlier, successful sub-batch in this
                // same chunk are already durable and must not be double-counted.
                for _ in 0..store_outcome.failed {
                    let entry = QuarantineEntry {
                        job_id: job.job_name.clone(),
                        chunk_id: chunk_id(&chunk),
                        schema: job.schema.as_str().to_string(),
                        reason: reason.clone(),
                        errors: Vec::new(),
                        raw_record: FlatRecord::new(),
                    };
                    let _ = self.quarantine.write(&entry);
                    stats.records_quarantined += 1;
                    metrics::counter!(crate::metrics::RECORDS_QUARANTINED).increment(1);
                }
            } else {
                stats.chunks_ok += 1;
                metrics::counter!(crate::metrics::CHUNKS_OK).increment(1);
            }
        }

        let _ = fetch_handle.await;
        progress.on_progress(ProgressStage::Done, stats.records_stored, None);
        stats.ended_at = Some(now_micros());
        Ok(stats)
    }

    /// Splits into `Schema::batch_size()`-sized sub-batches before handing
    /// each to the loader in its own transaction (spec §4.5 "Batches inserts
    /// (default batch size 1000-10000 per schema class)"); a storage error on
    /// one sub-batch does not discard the rows already committed by an
    /// earlier sub-batch in the same chunk -- `StoreOutcome.stored` and
    /// `StoreOutcome.failed` partition the chunk between what is durable and
    /// what still needs quarantining.
    async fn store_with_retry(&self, schema: Schema, batch: &[crate::models::Record]) -> StoreOutcome {
        let loader = self.loader_for(schema);
        let mut outcome = StoreOutcome::default();

        for sub_batch in batch.chunks(schema.batch_size()) {
            let mut last_err = None;
            let mut sub_stored = None;
            for attempt in 0..=LOADER_RETRY_LIMIT {
                match loader.load_batch(&self.pool, sub_batch).await {
                    Ok(n) => {
                        sub_stored = Some(n);
                        if attempt > 0 {
                            outcome.retried = true;
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "loader transaction failed");
                        last_err = Some(e);
                    }
                }
            }
            match sub_stored {
                Some(n) => outcome.stored += n,
                None => {
                    outcome.failed += sub_batch.len() as u64;
                    outcome.last_error =
                        Some(IngestError::Storage(last_err.expect("loop runs at least once")));
                }
            }
        }

        outcome
    }

    /// Schema-specific dict repair (spec §4.1 step 2, §4.6 order of
    /// resolution).
    fn repair_chunk(
        &self,
        schema: Schema,
        chunk: &Chunk,
        records: Vec<FlatRecord>,
    ) -> (Vec<FlatRecord>, RepairStats) {
        let mut stats = RepairStats::default();
        let mut repaired = Vec::with_capacity(records.len());

        for mut dict in records {
            match repair_symbol(&mut dict, &chunk.symbols) {
                RepairOutcome::Unchanged => {}
                RepairOutcome::Repaired => stats.repaired += 1,
                RepairOutcome::Failed => stats.failed_repair += 1,
            }
            if has_required_fields(schema, &dict) {
                repaired.push(dict);
            } else {
                stats.failed_repair += 1;
            }
        }

        (repaired, stats)
    }
}

enum RepairOutcome {
    Unchanged,
    Repaired,
    Failed,
}

/// Order of resolution for a record missing `symbol` (spec §4.6).
fn repair_symbol(dict: &mut FlatRecord, job_symbols: &[String]) -> RepairOutcome {
    if dict
        .get("symbol")
        .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(false))
        .unwrap_or(false)
    {
        return RepairOutcome::Unchanged;
    }

    if job_symbols.len() == 1 {
        dict.insert("symbol".to_string(), FieldValue::Str(job_symbols[0].clone()));
        return RepairOutcome::Repaired;
    }

    if let Some(raw_symbol) = dict.get("raw_symbol").and_then(FieldValue::as_str).map(str::to_string) {
        dict.insert("symbol".to_string(), FieldValue::Str(raw_symbol));
        return RepairOutcome::Repaired;
    }

    let instrument_id = dict.get("instrument_id").and_then(FieldValue::as_i64);

    if job_symbols.len() > 1 && instrument_id.is_some() {
        dict.insert("symbol".to_string(), FieldValue::Str(job_symbols[0].clone()));
        dict.insert(
            "__repair_warning".to_string(),
            FieldValue::Str("symbol best-effort from job symbols list".to_string()),
        );
        return RepairOutcome::Repaired;
    }

    if let Some(id) = instrument_id {
        dict.insert("symbol".to_string(), FieldValue::Str(format!("INSTRUMENT_{id}")));
        return RepairOutcome::Repaired;
    }

    dict.insert("symbol".to_string(), FieldValue::Str("UNKNOWN_SYMBOL".to_string()));
    RepairOutcome::Failed
}

/// Fields every schema requires before the rule engine runs (spec §3.1
/// minimum set: `ts_event`, `instrument_id`, `symbol` plus the schema's own
/// non-optional fields this stage can cheaply check).
fn has_required_fields(schema: Schema, dict: &FlatRecord) -> bool {
    let always = ["ts_event", "instrument_id", "symbol"];
    if always.iter().any(|f| !dict.contains_key(*f) || dict[*f].is_null()) {
        return false;
    }
    let schema_required: &[&str] = match schema {
        Schema::Ohlcv1S
        | Schema::Ohlcv1M
        | Schema::Ohlcv5M
        | Schema::Ohlcv15M
        | Schema::Ohlcv1H
        | Schema::Ohlcv1D => &["open_price", "high_price", "low_price", "close_price", "volume"],
        Schema::Trades => &["price", "size"],
        Schema::Tbbo => &[],
        Schema::Statistics => &["stat_type"],
        Schema::Definition => &["min_price_increment", "expiration", "activation"],
    };
    schema_required
        .iter()
        .all(|f| dict.contains_key(*f) && !dict[*f].is_null())
}

fn chunk_id(chunk: &Chunk) -> String {
    format!("{}_{}_{}", chunk.schema, chunk.start, chunk.end)
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn to_job_config(job: &Job) -> JobConfig {
    JobConfig {
        name: job.job_name.clone(),
        dataset: job.dataset.clone(),
        schema: job.schema.as_str().to_string(),
        symbols: job.symbols.clone(),
        stype_in: job.stype_in.clone(),
        start_date: job.start_date.clone(),
        end_date: job.end_date.clone(),
        date_chunk_interval_days: job.date_chunk_interval_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job_config() -> JobConfig {
        JobConfig {
            name: String::new(),
            dataset: "GLBX.MDP3".to_string(),
            schema: "ohlcv".to_string(),
            symbols: vec!["ES.c.0".to_string()],
            stype_in: "continuous".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            date_chunk_interval_days: None,
        }
    }

    #[test]
    fn job_from_config_synthesizes_a_name_when_absent() {
        let job = Job::from_config("databento", &base_job_config()).expect("should build");
        assert_eq!(job.job_name, "cli_ohlcv-1d_ES.c.0");
        assert_eq!(job.schema, Schema::Ohlcv1D);
    }

    #[test]
    fn job_from_config_preserves_an_explicit_name() {
        let mut cfg = base_job_config();
        cfg.name = "nightly_es".to_string();
        let job = Job::from_config("databento", &cfg).expect("should build");
        assert_eq!(job.job_name, "nightly_es");
    }

    #[test]
    fn job_from_config_rejects_an_unrecognized_schema() {
        let mut cfg = base_job_config();
        cfg.schema = "not_a_schema".to_string();
        assert!(Job::from_config("databento", &cfg).is_err());
    }

    #[test]
    fn repair_symbol_leaves_a_present_symbol_unchanged() {
        let mut dict = FlatRecord::new();
        dict.insert("symbol".to_string(), FieldValue::Str("ES.c.0".to_string()));
        let outcome = repair_symbol(&mut dict, &["ES.c.0".to_string()]);
        assert!(matches!(outcome, RepairOutcome::Unchanged));
    }

    #[test]
    fn repair_symbol_fills_from_a_single_job_symbol() {
        let mut dict = FlatRecord::new();
        let outcome = repair_symbol(&mut dict, &["ES.c.0".to_string()]);
        assert!(matches!(outcome, RepairOutcome::Repaired));
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("ES.c.0".to_string())));
    }

    #[test]
    fn repair_symbol_prefers_raw_symbol_over_job_symbols_list() {
        let mut dict = FlatRecord::new();
        dict.insert("raw_symbol".to_string(), FieldValue::Str("ESZ4".to_string()));
        let outcome = repair_symbol(&mut dict, &["ES.c.0".to_string(), "NQ.c.0".to_string()]);
        assert!(matches!(outcome, RepairOutcome::Repaired));
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("ESZ4".to_string())));
    }

    #[test]
    fn repair_symbol_best_effort_with_multiple_job_symbols_and_instrument_id() {
        let mut dict = FlatRecord::new();
        dict.insert("instrument_id".to_string(), FieldValue::Int(42));
        let outcome = repair_symbol(&mut dict, &["ES.c.0".to_string(), "NQ.c.0".to_string()]);
        assert!(matches!(outcome, RepairOutcome::Repaired));
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("ES.c.0".to_string())));
        assert!(dict.contains_key("__repair_warning"));
    }

    #[test]
    fn repair_symbol_synthesizes_from_instrument_id_when_no_job_symbols() {
        let mut dict = FlatRecord::new();
        dict.insert("instrument_id".to_string(), FieldValue::Int(42));
        let outcome = repair_symbol(&mut dict, &[]);
        assert!(matches!(outcome, RepairOutcome::Repaired));
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("INSTRUMENT_42".to_string())));
    }

    #[test]
    fn repair_symbol_fails_closed_with_no_symbol_no_instrument_id() {
        let mut dict = FlatRecord::new();
        let outcome = repair_symbol(&mut dict, &[]);
        assert!(matches!(outcome, RepairOutcome::Failed));
        assert_eq!(dict.get("symbol"), Some(&FieldValue::Str("UNKNOWN_SYMBOL".to_string())));
    }

    #[test]
    fn has_required_fields_checks_the_common_trio_first() {
        let dict = FlatRecord::new();
        assert!(!has_required_fields(Schema::Trades, &dict));
    }

    #[test]
    fn has_required_fields_checks_schema_specific_fields() {
        let mut dict = FlatRecord::new();
        dict.insert("ts_event".to_string(), FieldValue::Int(1));
        dict.insert("instrument_id".to_string(), FieldValue::Int(1));
        dict.insert("symbol".to_string(), FieldValue::Str("ES.c.0".to_string()));
        assert!(!has_required_fields(Schema::Trades, &dict));

        dict.insert("price".to_string(), FieldValue::Float(4500.0));
        dict.insert("size".to_string(), FieldValue::Int(1));
        assert!(has_required_fields(Schema::Trades, &dict));
    }

    #[test]
    fn has_required_fields_tbbo_only_needs_the_common_trio() {
        let mut dict = FlatRecord::new();
        dict.insert("ts_event".to_string(), FieldValue::Int(1));
        dict.insert("instrument_id".to_string(), FieldValue::Int(1));
        dict.insert("symbol".to_string(), FieldValue::Str("ES.c.0".to_string()));
        assert!(has_required_fields(Schema::Tbbo, &dict));
    }
}
