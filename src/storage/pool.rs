//! Connection pool construction (spec §5 "Shared resources": pool size
//! 10-20, 30s checkout timeout, recycle hourly, health-check on checkout).

use crate::config::DbConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub async fn connect(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .min_connections(10)
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(60 * 60))
        .test_before_acquire(true)
        .connect(&config.connection_string())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires a live TimescaleDB instance
    async fn connects_using_env_derived_config() {
        let config = DbConfig::from_env();
        let pool = connect(&config).await.expect("pool should connect");
        assert!(pool.size() >= 1);
    }
}
