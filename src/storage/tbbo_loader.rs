//! `tbbo_data` hypertable loader. Same `DO NOTHING` rationale as
//! `trade_loader` (see DESIGN.md).

use super::Loader;
use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct TbboLoader;

#[async_trait]
impl Loader for TbboLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tbbo_data (
                ts_event      BIGINT NOT NULL,
                ts_recv       BIGINT NOT NULL,
                publisher_id  INTEGER NOT NULL,
                instrument_id BIGINT NOT NULL,
                symbol        TEXT NOT NULL,
                bid_px        NUMERIC,
                ask_px        NUMERIC,
                bid_sz        BIGINT,
                ask_sz        BIGINT,
                bid_ct        BIGINT,
                ask_ct        BIGINT,
                sequence      BIGINT NOT NULL DEFAULT 0,
                flags         INTEGER,
                PRIMARY KEY (instrument_id, ts_event, sequence)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "SELECT create_hypertable('tbbo_data', 'ts_event', \
             chunk_time_interval => 3600000000, if_not_exists => TRUE, \
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
            let Record::Tbbo(r) = record else { continue };
            let result = sqlx::query(
                r#"
                INSERT INTO tbbo_data
                    (ts_event, ts_recv, publisher_id, instrument_id, symbol,
                     bid_px, ask_px, bid_sz, ask_sz, bid_ct, ask_ct, sequence, flags)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (instrument_id, ts_event, sequence) DO NOTHING
                "#,
            )
            .bind(r.ts_event)
            .bind(r.ts_recv)
            .bind(r.publisher_id)
            .bind(r.instrument_id)
            .bind(&r.symbol)
            .bind(r.bid_px)
            .bind(r.ask_px)
            .bind(r.bid_sz)
            .bind(r.ask_sz)
            .bind(r.bid_ct)
            .bind(r.ask_ct)
            // see trade_loader.rs: sequence is nullable in the domain model
            // but part of the conflict key, which Postgres forces NOT NULL.
            .bind(r.sequence.unwrap_or(0))
            .bind(r.flags)
            .execute(&mut *tx)
            .await?;
            stored += result.rows_affected();
        }

        tx.commit().await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TbboRecord;
    use rust_decimal::Decimal;

    fn quote() -> Record {
        Record::Tbbo(TbboRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            bid_px: Some(Decimal::new(449950, 2)),
            ask_px: Some(Decimal::new(450050, 2)),
            bid_sz: Some(10),
            ask_sz: Some(5),
            bid_ct: None,
            ask_ct: None,
            sequence: Some(1),
            flags: None,
            crossed: false,
        })
    }

    // Requires a live TimescaleDB instance; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore] // requires a live TimescaleDB instance
    async fn duplicate_quotes_are_a_no_op_on_conflict() {
        let db = crate::config::DbConfig::from_env();
        let pool = super::super::pool::connect(&db).await.expect("db connection");
        let loader = TbboLoader;
        loader.ensure_schema(&pool).await.expect("ensure_schema");

        let batch = vec![quote()];
        let first = loader.load_batch(&pool, &batch).await.expect("first load");
        let second = loader.load_batch(&pool, &batch).await.expect("second load");
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
