//! Thin CLI entrypoint (spec §6.2): `ingest | query | status | list-jobs`.
//!
//! This binary is the external collaborator the core spec treats as
//! out-of-scope (§1 "the CLI... configuration file loading... terminal
//! progress/monitoring UX"); it only wires flags to the library's
//! `Orchestrator`/`QueryBuilder`/`Job` types and translates their results
//! into the exit codes in §6.2. All structured diagnostics still go through
//! `tracing`, never to stdout from core code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hist_data_ingestor::adapter::databento::DatabentoAdapter;
use hist_data_ingestor::adapter::{ApiAdapter, RetryPolicy};
use hist_data_ingestor::config::{AppConfig, DbConfig, JobConfig};
use hist_data_ingestor::error::ExitCode;
use hist_data_ingestor::orchestrator::{Job, Orchestrator, ProgressCallback, ProgressStage, TracingProgress};
use hist_data_ingestor::quarantine::QuarantineSink;
use hist_data_ingestor::query::QueryBuilder;
use hist_data_ingestor::rules::mapping_config::MappingConfig;
use hist_data_ingestor::storage::pool;
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ingestor")]
#[command(about = "Historical market data ingestion pipeline (Databento -> TimescaleDB)")]
struct Cli {
    /// Path to the YAML job configuration file (spec §6.1).
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one ingestion job end to end.
    Ingest {
        /// Adapter name, e.g. "databento" (required, spec §6.2).
        #[arg(long)]
        api: String,
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        /// Comma-separated or repeated `--symbols`.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long = "stype-in")]
        stype_in: Option<String>,
        #[arg(long = "start-date")]
        start_date: Option<String>,
        #[arg(long = "end-date")]
        end_date: Option<String>,
        /// Name of a predefined job in the config file.
        #[arg(long)]
        job: Option<String>,
        /// Re-run even if a job with this name already completed.
        #[arg(long)]
        force: bool,
        /// Validate and print the resolved job without fetching or storing anything.
        #[arg(long = "dry-run")]
        dry_run: bool,
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,
    },
    /// Query a stored schema over a symbol/date range.
    Query {
        #[arg(long)]
        schema: String,
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long = "start-date")]
        start_date: String,
        #[arg(long = "end-date")]
        end_date: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Check DB connectivity and report which hypertables exist.
    Status,
    /// List the jobs declared in the config file.
    ListJobs,
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            hist_data_ingestor::config::log_level_from_env(),
        ))
        .init();

    hist_data_ingestor::metrics::install();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => to_process_exit_code(code),
        Err(err) => {
            error!(error = %err, "fatal error");
            eprintln!("error: {err:#}");
            to_process_exit_code(ExitCode::FatalPipelineError)
        }
    }
}

fn to_process_exit_code(code: ExitCode) -> ProcessExitCode {
    ProcessExitCode::from(code as u8)
}

struct StdoutProgress;

impl ProgressCallback for StdoutProgress {
    fn on_progress(&self, stage: ProgressStage, count: u64, message: Option<&str>) {
        info!(stage = ?stage, count, message, "progress");
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Ingest {
            api,
            dataset,
            schema,
            symbols,
            stype_in,
            start_date,
            end_date,
            job,
            force,
            dry_run,
            batch_size,
        } => {
            ingest(
                &cli.config,
                api,
                dataset,
                schema,
                symbols,
                stype_in,
                start_date,
                end_date,
                job,
                force,
                dry_run,
                batch_size,
            )
            .await
        }
        Commands::Query {
            schema,
            symbols,
            start_date,
            end_date,
            limit,
        } => query(&cli.config, schema, symbols, start_date, end_date, limit).await,
        Commands::Status => status(&cli.config).await,
        Commands::ListJobs => list_jobs(&cli.config),
    }
}

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    AppConfig::from_yaml_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
async fn ingest(
    config_path: &PathBuf,
    api: String,
    dataset: Option<String>,
    schema: Option<String>,
    symbols: Vec<String>,
    stype_in: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    job_name: Option<String>,
    _force: bool,
    dry_run: bool,
    batch_size: Option<usize>,
) -> Result<ExitCode> {
    let app_config = load_config(config_path)?;

    let job_cfg = match job_name {
        Some(name) => app_config
            .job(&name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no job named '{name}' in {}", config_path.display()))?,
        None => {
            let schema = schema.ok_or_else(|| anyhow::anyhow!("--schema is required without --job"))?;
            let start_date =
                start_date.ok_or_else(|| anyhow::anyhow!("--start-date is required without --job"))?;
            let end_date =
                end_date.ok_or_else(|| anyhow::anyhow!("--end-date is required without --job"))?;
            if start_date == end_date {
                // spec §6.2: "--end-date ... must differ from start-date"; §8 P7/scenario 6.
                return Ok(ExitCode::UserError);
            }
            JobConfig {
                name: String::new(),
                dataset: dataset.unwrap_or_default(),
                schema,
                symbols,
                stype_in: stype_in.unwrap_or_else(|| "continuous".to_string()),
                start_date,
                end_date,
                date_chunk_interval_days: None,
            }
        }
    };

    if job_cfg.start_date == job_cfg.end_date {
        return Ok(ExitCode::UserError);
    }

    let job = Job::from_config(&api, &job_cfg)
        .map_err(|e| anyhow::anyhow!("invalid job: {e}"))?;

    if dry_run {
        println!("{job:#?}");
        return Ok(ExitCode::Success);
    }

    let retry_policy = RetryPolicy::from(&app_config.retry_policy);
    let mut adapter = DatabentoAdapter::new(&app_config.api, retry_policy)
        .with_context(|| "constructing adapter")?;
    adapter
        .configure(&job_cfg)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mapping_raw = std::fs::read_to_string(&app_config.transformation.mapping_config_path)
        .with_context(|| {
            format!(
                "reading mapping config {}",
                app_config.transformation.mapping_config_path.display()
            )
        })?;
    let mapping_config =
        MappingConfig::from_yaml_str(&mapping_raw).with_context(|| "parsing mapping config")?;

    let db_config = DbConfig::from_env();
    let pg_pool = pool::connect(&db_config)
        .await
        .with_context(|| "connecting to TimescaleDB")?;

    let quarantine = QuarantineSink::new("dlq");
    let orchestrator = Orchestrator::new(pg_pool, mapping_config, quarantine);

    let _ = batch_size; // per-schema batch sizes are fixed by Schema::batch_size (spec §4.5); this flag is advisory only.

    let stats = orchestrator
        .run(&job, Arc::new(adapter), &StdoutProgress, CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("{}", serde_json::to_string_pretty(&stats)?);

    if stats.cancelled {
        return Ok(ExitCode::FatalPipelineError);
    }
    if stats.records_quarantined > 0 || stats.chunks_failed > 0 {
        return Ok(ExitCode::PartialSuccess);
    }
    Ok(ExitCode::Success)
}

async fn query(
    config_path: &PathBuf,
    schema: String,
    symbols: Vec<String>,
    start_date: String,
    end_date: String,
    limit: Option<i64>,
) -> Result<ExitCode> {
    let _ = load_config(config_path); // optional; query only needs DB connectivity
    let db_config = DbConfig::from_env();
    let pg_pool = pool::connect(&db_config).await.with_context(|| "connecting to TimescaleDB")?;
    let builder = QueryBuilder::new(pg_pool);

    let start = chrono::NaiveDate::parse_from_str(&start_date, "%Y-%m-%d")
        .with_context(|| "invalid --start-date")?
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_micros();
    let end = chrono::NaiveDate::parse_from_str(&end_date, "%Y-%m-%d")
        .with_context(|| "invalid --end-date")?
        .and_hms_opt(23, 59, 59)
        .unwrap()
        .and_utc()
        .timestamp_micros();

    let rows = match schema.as_str() {
        "ohlcv" | "ohlcv-1d" => builder.query_daily_ohlcv(&symbols, start, end, None, limit).await,
        "trades" => builder.query_trades(&symbols, start, end, None, None, limit).await,
        "tbbo" => builder.query_tbbo(&symbols, start, end, limit).await,
        "statistics" => builder.query_statistics(&symbols, start, end, None, limit).await,
        "definition" | "definitions" => {
            builder.query_definitions(&symbols, start, end, None, None, limit).await
        }
        other => return Err(anyhow::anyhow!("unrecognized query schema '{other}'")),
    }
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(ExitCode::Success)
}

async fn status(_config_path: &PathBuf) -> Result<ExitCode> {
    let db_config = DbConfig::from_env();
    match pool::connect(&db_config).await {
        Ok(pg_pool) => {
            for table in [
                "daily_ohlcv_data",
                "trades_data",
                "tbbo_data",
                "statistics_data",
                "definitions_data",
            ] {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
                )
                .bind(table)
                .fetch_one(&pg_pool)
                .await
                .unwrap_or(false);
                println!("{table}: {}", if exists { "present" } else { "absent" });
            }
            Ok(ExitCode::Success)
        }
        Err(e) => {
            eprintln!("database unreachable: {e}");
            Ok(ExitCode::ConfigError)
        }
    }
}

fn list_jobs(config_path: &PathBuf) -> Result<ExitCode> {
    let app_config = load_config(config_path)?;
    for job in &app_config.jobs {
        println!(
            "{}\tdataset={}\tschema={}\tsymbols={}\t{}..{}",
            job.name,
            job.dataset,
            job.schema,
            job.symbols.join(","),
            job.start_date,
            job.end_date
        );
    }
    Ok(ExitCode::Success)
}
