//! `statistics_data` hypertable loader (spec §4.5: conflict key
//! `(instrument_id, stat_type, ts_event)`, UPDATE on conflict).

use super::Loader;
use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct StatisticsLoader;

#[async_trait]
impl Loader for StatisticsLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS statistics_data (
                ts_event      BIGINT NOT NULL,
                ts_recv       BIGINT NOT NULL,
                ts_ref        BIGINT,
                publisher_id  INTEGER NOT NULL,
                instrument_id BIGINT NOT NULL,
                symbol        TEXT NOT NULL,
                stat_type     INTEGER NOT NULL,
                stat_value    NUMERIC,
                quantity      BIGINT,
                sequence      BIGINT,
                ts_in_delta   BIGINT,
                channel_id    INTEGER,
                update_action INTEGER NOT NULL,
                stat_flags    INTEGER
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS statistics_data_conflict_key \
             ON statistics_data (instrument_id, stat_type, ts_event)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "SELECT create_hypertable('statistics_data', 'ts_event', \
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
            let Record::Statistics(r) = record else { continue };
            sqlx::query(
                r#"
                INSERT INTO statistics_data
                    (ts_event, ts_recv, ts_ref, publisher_id, instrument_id, symbol,
                     stat_type, stat_value, quantity, sequence, ts_in_delta,
                     channel_id, update_action, stat_flags)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (instrument_id, stat_type, ts_event)
                DO UPDATE SET
                    stat_value = EXCLUDED.stat_value,
                    stat_flags = EXCLUDED.stat_flags,
                    update_action = EXCLUDED.update_action
                "#,
            )
            .bind(r.ts_event)
            .bind(r.ts_recv)
            .bind(r.ts_ref)
            .bind(r.publisher_id)
            .bind(r.instrument_id)
            .bind(&r.symbol)
            .bind(r.stat_type)
            .bind(r.stat_value)
            .bind(r.quantity)
            .bind(r.sequence)
            .bind(r.ts_in_delta)
            .bind(r.channel_id)
            .bind(r.update_action)
            .bind(r.stat_flags)
            .execute(&mut *tx)
            .await?;
            stored += 1;
        }

        tx.commit().await?;
        Ok(stored)
    }
}
