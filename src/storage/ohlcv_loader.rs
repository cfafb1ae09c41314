//! `daily_ohlcv_data` hypertable loader (spec §4.5: conflict key
//! `(ts_event, instrument_id, granularity, data_source)`, UPDATE on
//! conflict). Grounded on `other_examples`'s refdata_loader.rs upsert shape,
//! ported from rusqlite's DDL-in-code idiom (teacher's
//! `signals/db_storage.rs`) to `sqlx::PgPool`.

use super::Loader;
use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct OhlcvLoader;

#[async_trait]
impl Loader for OhlcvLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_ohlcv_data (
                ts_event      BIGINT NOT NULL,
                instrument_id BIGINT NOT NULL,
                symbol        TEXT NOT NULL,
                open_price    NUMERIC NOT NULL,
                high_price    NUMERIC NOT NULL,
                low_price     NUMERIC NOT NULL,
                close_price   NUMERIC NOT NULL,
                volume        BIGINT NOT NULL,
                trade_count   BIGINT,
                vwap          NUMERIC,
                granularity   TEXT NOT NULL,
                data_source   TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS daily_ohlcv_data_conflict_key \
             ON daily_ohlcv_data (ts_event, instrument_id, granularity, data_source)",
        )
        .execute(pool)
        .await?;

        // Idempotent: informational notice, not an error, when already a
        // hypertable (spec §3.3).
        sqlx::query(
            "SELECT create_hypertable('daily_ohlcv_data', 'ts_event', \
             chunk_time_interval => 86400000000, if_not_exists => TRUE, \
             migrate_data => TRUE)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_batch(&self, pool: &PgPool, batch: &[Record]) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut stored = 0u64;

        for record in batch {
            let Record::Ohlcv(r) = record else { continue };
            sqlx::query(
                r#"
                INSERT INTO daily_ohlcv_data
                    (ts_event, instrument_id, symbol, open_price, high_price,
                     low_price, close_price, volume, trade_count, vwap,
                     granularity, data_source)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (ts_event, instrument_id, granularity, data_source)
                DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    open_price = EXCLUDED.open_price,
                    high_price = EXCLUDED.high_price,
                    low_price = EXCLUDED.low_price,
                    close_price = EXCLUDED.close_price,
                    volume = EXCLUDED.volume,
                    trade_count = EXCLUDED.trade_count,
                    vwap = EXCLUDED.vwap
                "#,
            )
            .bind(r.ts_event)
            .bind(r.instrument_id)
            .bind(&r.symbol)
            .bind(r.open_price)
            .bind(r.high_price)
            .bind(r.low_price)
            .bind(r.close_price)
            .bind(r.volume)
            .bind(r.trade_count)
            .bind(r.vwap)
            .bind(r.granularity.as_str())
            .bind(&r.data_source)
            .execute(&mut *tx)
            .await?;
            stored += 1;
        }

        tx.commit().await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Granularity, OhlcvRecord};
    use rust_decimal::Decimal;

    fn bar() -> Record {
        Record::Ohlcv(OhlcvRecord {
            ts_event: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            open_price: Decimal::new(100, 0),
            high_price: Decimal::new(110, 0),
            low_price: Decimal::new(95, 0),
            close_price: Decimal::new(105, 0),
            volume: 10,
            trade_count: Some(4),
            vwap: Some(Decimal::new(102, 0)),
            granularity: Granularity::OneDay,
            data_source: "databento".to_string(),
        })
    }

    // Requires a live TimescaleDB instance; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore] // requires a live TimescaleDB instance
    async fn loading_the_same_batch_twice_is_idempotent() {
        let db = crate::config::DbConfig::from_env();
        let pool = super::super::pool::connect(&db).await.expect("db connection");
        let loader = OhlcvLoader;
        loader.ensure_schema(&pool).await.expect("ensure_schema");

        let batch = vec![bar()];
        let first = loader.load_batch(&pool, &batch).await.expect("first load");
        let second = loader.load_batch(&pool, &batch).await.expect("second load");
        assert_eq!(first, second);
    }
}
