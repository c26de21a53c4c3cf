use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let statement_timeout_ms = config.statement_timeout_ms;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    // Bounds hung statements on every pooled connection
                    if statement_timeout_ms > 0 {
                        conn.execute(format!("SET statement_timeout = {}", statement_timeout_ms).as_str())
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        info!(
            "Connected to PostgreSQL (max {} connections, statement timeout {} ms)",
            config.max_connections, statement_timeout_ms
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    const SCHEMA: &str = include_str!("../../migrations/0001_schema.sql");

    #[test]
    fn test_schema_uses_no_generated_uuids() {
        // gen_random_uuid() needs PostgreSQL 13+ or pgcrypto; ids come from the application
        assert!(!SCHEMA.contains("gen_random_uuid"));
        assert!(!SCHEMA.contains("uuid_generate"));
    }
}
