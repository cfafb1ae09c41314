//! Storage loaders: one per record kind, each owning its table's DDL and
//! conflict semantics (spec §3.3, §4.5).

pub mod definition_loader;
pub mod ohlcv_loader;
pub mod pool;
pub mod statistics_loader;
pub mod tbbo_loader;
pub mod trade_loader;

use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

/// A loader routes a homogeneous batch of one record kind into its
/// hypertable, creating the table/hypertable on first use (spec §4.5,
/// §3.3 "the Loader owns DDL... and DML thereafter").
#[async_trait]
pub trait Loader {
    /// Idempotent: `CREATE TABLE IF NOT EXISTS` + `create_hypertable(...,
    /// if_not_exists => TRUE)`.
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error>;

    /// Loads one batch inside a single transaction. Loading the same
    /// validated batch any number of times must produce the same stored
    /// rows (spec §4.5 idempotency invariant).
    async fn load_batch(&self, pool: &PgPool, batch: &[Record]) -> Result<u64, sqlx::Error>;
}
