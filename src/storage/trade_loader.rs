//! `trades_data` hypertable loader. Spec §4.5 leaves the conflict mechanism
//! open ("duplicates rely on PK rejection or explicit DO NOTHING"); this
//! implementation uses an explicit `ON CONFLICT ... DO NOTHING` (see
//! DESIGN.md) because a bare PK violation inside a batched `sqlx`
//! transaction aborts the whole transaction, not just the offending row.

use super::Loader;
use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct TradeLoader;

#[async_trait]
impl Loader for TradeLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades_data (
                ts_event      BIGINT NOT NULL,
                ts_recv       BIGINT NOT NULL,
                publisher_id  INTEGER NOT NULL,
                instrument_id BIGINT NOT NULL,
                symbol        TEXT NOT NULL,
                price         NUMERIC NOT NULL,
                size          BIGINT NOT NULL,
                action        CHAR(1) NOT NULL,
                side          CHAR(1) NOT NULL,
                flags         INTEGER NOT NULL,
                depth         INTEGER NOT NULL,
                sequence      BIGINT NOT NULL DEFAULT 0,
                ts_in_delta   BIGINT,
                PRIMARY KEY (instrument_id, ts_event, sequence, price, size, side)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "SELECT create_hypertable('trades_data', 'ts_event', \
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
            let Record::Trade(r) = record else { continue };
            let result = sqlx::query(
                r#"
                INSERT INTO trades_data
                    (ts_event, ts_recv, publisher_id, instrument_id, symbol,
                     price, size, action, side, flags, depth, sequence, ts_in_delta)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (instrument_id, ts_event, sequence, price, size, side)
                DO NOTHING
                "#,
            )
            .bind(r.ts_event)
            .bind(r.ts_recv)
            .bind(r.publisher_id)
            .bind(r.instrument_id)
            .bind(&r.symbol)
            .bind(r.price)
            .bind(r.size)
            .bind(r.action.to_string())
            .bind(r.side.as_char().to_string())
            .bind(r.flags)
            .bind(r.depth)
            // `sequence` is nullable in the domain model (spec §3.1 "sequence?")
            // but is part of the conflict key, which Postgres forces NOT NULL;
            // 0 is the sentinel for "vendor supplied no sequence".
            .bind(r.sequence.unwrap_or(0))
            .bind(r.ts_in_delta)
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
    use crate::models::{Side, TradeRecord};
    use rust_decimal::Decimal;

    fn trade() -> Record {
        Record::Trade(TradeRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 1,
            symbol: "ES.c.0".to_string(),
            price: Decimal::new(450050, 2),
            size: 2,
            action: 'T',
            side: Side::Ask,
            flags: 0,
            depth: 0,
            sequence: Some(1),
            ts_in_delta: None,
            is_spread: false,
            raw_side: None,
        })
    }

    // Requires a live TimescaleDB instance; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore] // requires a live TimescaleDB instance
    async fn duplicate_trades_are_a_no_op_on_conflict() {
        let db = crate::config::DbConfig::from_env();
        let pool = super::super::pool::connect(&db).await.expect("db connection");
        let loader = TradeLoader;
        loader.ensure_schema(&pool).await.expect("ensure_schema");

        let batch = vec![trade()];
        let first = loader.load_batch(&pool, &batch).await.expect("first load");
        let second = loader.load_batch(&pool, &batch).await.expect("second load");
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
