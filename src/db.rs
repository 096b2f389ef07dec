//! Database module
//!
//! Connection pool setup and schema management.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::time::Duration;

use crate::config::Config;

/// Schema applied by [`apply_schema`]
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_ledger_core.sql");

/// Tables the ledger cannot run without
const REQUIRED_TABLES: [&str; 3] = ["users", "accounts", "transactions"];

/// Create the connection pool
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        max_connections = config.database_max_connections,
        "Database pool created"
    );
    Ok(pool)
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the ledger schema. Safe to run repeatedly and concurrently.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // multi-statement: goes through the simple query protocol as one implicit transaction
    pool.execute(SCHEMA_SQL).await?;
    tracing::info!("Ledger schema applied");
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
