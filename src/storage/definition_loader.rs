//! `definitions_data` hypertable loader (spec §4.5: conflict key
//! `(instrument_id, ts_event)`, UPDATE on conflict). Wide rows, small
//! batches (100, per `Schema::batch_size`).

use super::Loader;
use crate::models::Record;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct DefinitionLoader;

#[async_trait]
impl Loader for DefinitionLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS definitions_data (
                ts_event                     BIGINT NOT NULL,
                ts_recv                      BIGINT NOT NULL,
                publisher_id                 INTEGER NOT NULL,
                instrument_id                BIGINT NOT NULL,
                raw_instrument_id            BIGINT,
                symbol                       TEXT NOT NULL,
                raw_symbol                   TEXT,
                security_update_action       CHAR(1) NOT NULL,
                instrument_class             TEXT NOT NULL,
                min_price_increment          NUMERIC NOT NULL,
                display_factor               NUMERIC NOT NULL,
                expiration                   BIGINT NOT NULL,
                activation                   BIGINT NOT NULL,
                high_limit_price             NUMERIC,
                low_limit_price              NUMERIC,
                max_price_variation          NUMERIC,
                trading_reference_price      NUMERIC,
                unit_of_measure_qty          NUMERIC,
                min_price_increment_amount   NUMERIC,
                price_ratio                  NUMERIC,
                strike_price                 NUMERIC,
                strike_price_currency        TEXT,
                inst_attrib_value            BIGINT,
                underlying_id                BIGINT,
                market_depth_implied         INTEGER,
                market_depth                 INTEGER,
                market_segment_id            INTEGER,
                max_trade_vol                BIGINT,
                min_lot_size                 BIGINT,
                min_lot_size_block           BIGINT,
                min_lot_size_round_lot       BIGINT,
                min_trade_vol                BIGINT,
                contract_multiplier          INTEGER,
                contract_multiplier_unit     INTEGER,
                decay_quantity               INTEGER,
                decay_start_date             BIGINT,
                original_contract_size       BIGINT,
                trading_reference_date       BIGINT,
                appl_id                      INTEGER,
                maturity_year                INTEGER,
                maturity_month               INTEGER,
                maturity_day                 INTEGER,
                maturity_week                INTEGER,
                currency                     TEXT,
                settl_currency               TEXT,
                secsubtype                   TEXT,
                group_code                   TEXT,
                exchange                     TEXT,
                asset                        TEXT,
                cfi                          TEXT,
                security_type                TEXT,
                unit_of_measure              TEXT,
                underlying                   TEXT,
                match_algorithm              CHAR(1),
                md_security_trading_status   INTEGER,
                main_fraction                INTEGER,
                sub_fraction                 INTEGER,
                price_display_format         INTEGER,
                settl_price_type             INTEGER,
                underlying_product           INTEGER,
                flow_schedule_type           INTEGER,
                tick_rule                    INTEGER,
                channel_id                   INTEGER NOT NULL,
                user_defined_instrument      CHAR(1),
                leg_count                    INTEGER NOT NULL,
                leg_index                    INTEGER,
                leg_instrument_id            BIGINT,
                leg_price                    NUMERIC,
                leg_side                     CHAR(1),
                leg_ratio_price_numerator    INTEGER,
                leg_ratio_price_denominator  INTEGER,
                leg_ratio_qty_numerator      INTEGER,
                leg_ratio_qty_denominator    INTEGER,
                leg_underlying_id            BIGINT,
                extra                        JSONB NOT NULL DEFAULT '{}'::jsonb
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS definitions_data_conflict_key \
             ON definitions_data (instrument_id, ts_event)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "SELECT create_hypertable('definitions_data', 'ts_event', \
             chunk_time_interval => 31536000000000, if_not_exists => TRUE, \
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
            let Record::Definition(r) = record else { continue };
            sqlx::query(
                r#"
                INSERT INTO definitions_data (
                    ts_event, ts_recv, publisher_id, instrument_id, raw_instrument_id,
                    symbol, raw_symbol, security_update_action, instrument_class,
                    min_price_increment, display_factor, expiration, activation,
                    high_limit_price, low_limit_price, max_price_variation,
                    trading_reference_price, unit_of_measure_qty,
                    min_price_increment_amount, price_ratio, strike_price,
                    strike_price_currency, inst_attrib_value, underlying_id,
                    market_depth_implied, market_depth, market_segment_id,
                    max_trade_vol, min_lot_size, min_lot_size_block,
                    min_lot_size_round_lot, min_trade_vol, contract_multiplier,
                    contract_multiplier_unit, decay_quantity, decay_start_date,
                    original_contract_size, trading_reference_date, appl_id,
                    maturity_year, maturity_month, maturity_day, maturity_week,
                    currency, settl_currency, secsubtype,
                    group_code, exchange, asset, cfi, security_type, unit_of_measure,
                    underlying, match_algorithm, md_security_trading_status,
                    main_fraction, sub_fraction, price_display_format,
                    settl_price_type, underlying_product, flow_schedule_type,
                    tick_rule, channel_id, user_defined_instrument,
                    leg_count, leg_index, leg_instrument_id, leg_price, leg_side,
                    leg_ratio_price_numerator, leg_ratio_price_denominator,
                    leg_ratio_qty_numerator, leg_ratio_qty_denominator,
                    leg_underlying_id, extra
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
                    $29, $30, $31, $32, $33, $34, $35, $36, $37, $38, $39, $40, $41,
                    $42, $43, $44, $45, $46, $47, $48, $49, $50, $51, $52, $53, $54,
                    $55, $56, $57, $58, $59, $60, $61, $62, $63, $64, $65, $66, $67,
                    $68, $69, $70, $71, $72, $73, $74, $75
                )
                ON CONFLICT (instrument_id, ts_event) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    high_limit_price = EXCLUDED.high_limit_price,
                    low_limit_price = EXCLUDED.low_limit_price,
                    expiration = EXCLUDED.expiration,
                    extra = EXCLUDED.extra
                "#,
            )
            .bind(r.ts_event)
            .bind(r.ts_recv)
            .bind(r.publisher_id)
            .bind(r.instrument_id)
            .bind(r.raw_instrument_id)
            .bind(&r.symbol)
            .bind(&r.raw_symbol)
            .bind(r.security_update_action.to_string())
            .bind(&r.instrument_class)
            .bind(r.min_price_increment)
            .bind(r.display_factor)
            .bind(r.expiration)
            .bind(r.activation)
            .bind(r.high_limit_price)
            .bind(r.low_limit_price)
            .bind(r.max_price_variation)
            .bind(r.trading_reference_price)
            .bind(r.unit_of_measure_qty)
            .bind(r.min_price_increment_amount)
            .bind(r.price_ratio)
            .bind(r.strike_price)
            .bind(&r.strike_price_currency)
            .bind(r.inst_attrib_value)
            .bind(r.underlying_id)
            .bind(r.market_depth_implied)
            .bind(r.market_depth)
            .bind(r.market_segment_id)
            .bind(r.max_trade_vol)
            .bind(r.min_lot_size)
            .bind(r.min_lot_size_block)
            .bind(r.min_lot_size_round_lot)
            .bind(r.min_trade_vol)
            .bind(r.contract_multiplier)
            .bind(r.contract_multiplier_unit)
            .bind(r.decay_quantity)
            .bind(r.decay_start_date)
            .bind(r.original_contract_size)
            .bind(r.trading_reference_date)
            .bind(r.appl_id)
            .bind(r.maturity_year)
            .bind(r.maturity_month)
            .bind(r.maturity_day)
            .bind(r.maturity_week)
            .bind(&r.currency)
            .bind(&r.settl_currency)
            .bind(&r.secsubtype)
            .bind(&r.group)
            .bind(&r.exchange)
            .bind(&r.asset)
            .bind(&r.cfi)
            .bind(&r.security_type)
            .bind(&r.unit_of_measure)
            .bind(&r.underlying)
            .bind(r.match_algorithm.map(|c| c.to_string()))
            .bind(r.md_security_trading_status)
            .bind(r.main_fraction)
            .bind(r.sub_fraction)
            .bind(r.price_display_format)
            .bind(r.settl_price_type)
            .bind(r.underlying_product)
            .bind(r.flow_schedule_type)
            .bind(r.tick_rule)
            .bind(r.channel_id)
            .bind(r.user_defined_instrument.map(|c| c.to_string()))
            .bind(r.leg_count)
            .bind(r.leg_index)
            .bind(r.leg_instrument_id)
            .bind(r.leg_price)
            .bind(r.leg_side.map(|c| c.to_string()))
            .bind(r.leg_ratio_price_numerator)
            .bind(r.leg_ratio_price_denominator)
            .bind(r.leg_ratio_qty_numerator)
            .bind(r.leg_ratio_qty_denominator)
            .bind(r.leg_underlying_id)
            .bind(&r.extra)
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
    use crate::models::DefinitionRecord;
    use rust_decimal::Decimal;

    fn definition() -> Record {
        Record::Definition(DefinitionRecord {
            ts_event: 1,
            ts_recv: 1,
            publisher_id: 1,
            instrument_id: 1,
            raw_instrument_id: None,
            symbol: "ES.FUT".to_string(),
            raw_symbol: None,
            security_update_action: 'A',
            instrument_class: "FUT".to_string(),
            min_price_increment: Decimal::new(25, 2),
            display_factor: Decimal::new(1, 0),
            expiration: 1_000,
            activation: 100,
            high_limit_price: None,
            low_limit_price: None,
            max_price_variation: None,
            trading_reference_price: None,
            unit_of_measure_qty: None,
            min_price_increment_amount: None,
            price_ratio: None,
            strike_price: None,
            strike_price_currency: None,
            inst_attrib_value: None,
            underlying_id: None,
            market_depth_implied: None,
            market_depth: None,
            market_segment_id: None,
            max_trade_vol: None,
            min_lot_size: None,
            min_lot_size_block: None,
            min_lot_size_round_lot: None,
            min_trade_vol: None,
            contract_multiplier: None,
            contract_multiplier_unit: None,
            decay_quantity: None,
            decay_start_date: None,
            original_contract_size: None,
            trading_reference_date: None,
            appl_id: None,
            maturity_year: None,
            maturity_month: None,
            maturity_day: None,
            maturity_week: None,
            channel_id: 0,
            currency: None,
            settl_currency: None,
            secsubtype: None,
            group: None,
            exchange: None,
            asset: None,
            cfi: None,
            security_type: None,
            unit_of_measure: None,
            underlying: None,
            match_algorithm: None,
            md_security_trading_status: None,
            main_fraction: None,
            sub_fraction: None,
            price_display_format: None,
            settl_price_type: None,
            underlying_product: None,
            user_defined_instrument: None,
            flow_schedule_type: None,
            tick_rule: None,
            leg_count: 0,
            leg_index: None,
            leg_instrument_id: None,
            leg_price: None,
            leg_side: None,
            leg_ratio_price_numerator: None,
            leg_ratio_price_denominator: None,
            leg_ratio_qty_numerator: None,
            leg_ratio_qty_denominator: None,
            leg_underlying_id: None,
            extra: serde_json::json!({}),
        })
    }

    // Requires a live TimescaleDB instance; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore] // requires a live TimescaleDB instance
    async fn loading_the_same_definition_twice_is_idempotent() {
        let db = crate::config::DbConfig::from_env();
        let pool = super::super::pool::connect(&db).await.expect("db connection");
        let loader = DefinitionLoader;
        loader.ensure_schema(&pool).await.expect("ensure_schema");

        let batch = vec![definition()];
        let first = loader.load_batch(&pool, &batch).await.expect("first load");
        let second = loader.load_batch(&pool, &batch).await.expect("second load");
        assert_eq!(first, second);
    }
}
